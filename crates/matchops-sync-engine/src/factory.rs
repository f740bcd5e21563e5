//! The process-wide factory (§4.6): builds exactly one `WriteThroughStore`
//! (and one app-supplied auth handle) per build mode, lazily and
//! race-safely, and tears both down on a mode change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use matchops_sync_types::db_naming::{get_user_database_name, LEGACY_DATABASE_NAME};
use matchops_sync_types::{LocalStore, RemoteStore, SyncError};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::engine;
use crate::write_through::WriteThroughStore;

/// Which backend a built instance is bound to: the fixed legacy/anonymous
/// database, or one scoped to a logged-in user (§6 database naming).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    Anonymous,
    User(String),
}

impl BuildMode {
    fn database_name(&self) -> Result<String, SyncError> {
        match self {
            BuildMode::Anonymous => Ok(LEGACY_DATABASE_NAME.to_string()),
            BuildMode::User(user_id) => get_user_database_name(user_id),
        }
    }
}

struct Instance<A> {
    mode: BuildMode,
    store: Arc<WriteThroughStore>,
    auth: Arc<A>,
}

/// One factory instance is meant to live for the lifetime of the embedding
/// process (typically behind an app-level `OnceLock`/`lazy_static`); this
/// crate doesn't impose that storage itself since the auth handle type `A`
/// is supplied by the application.
///
/// Holding `slot`'s lock for the full duration of a build is what gives
/// concurrent first callers the "share an in-flight build" behavior (§4.6):
/// a second caller simply blocks on the mutex and then observes the build
/// the first caller already finished, rather than racing to build twice.
pub struct Factory<A> {
    base_dir: PathBuf,
    slot: AsyncMutex<Option<Instance<A>>>,
}

impl<A: Send + Sync + 'static> Factory<A> {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            slot: AsyncMutex::new(None),
        }
    }

    /// Returns the current (store, auth) pair for `mode`, building it (and
    /// tearing down any previous instance bound to a different mode) if
    /// necessary.
    pub async fn get_or_build<FL, FR, FA>(
        &self,
        mode: BuildMode,
        build_local: FL,
        build_remote: FR,
        build_auth: FA,
    ) -> Result<(Arc<WriteThroughStore>, Arc<A>), SyncError>
    where
        FL: FnOnce() -> Arc<dyn LocalStore>,
        FR: FnOnce() -> Arc<dyn RemoteStore>,
        FA: FnOnce() -> A,
    {
        let mut slot = self.slot.lock().await;

        if let Some(existing) = slot.as_ref() {
            if existing.mode == mode {
                return Ok((Arc::clone(&existing.store), Arc::clone(&existing.auth)));
            }
        }
        if let Some(previous) = slot.take() {
            previous.store.close().await?;
        }

        let db_name = mode.database_name()?;
        let queue_path = self.queue_path(&db_name);
        let queue = Arc::new(matchops_sync_queue::Queue::open(&queue_path)?);
        let sync_engine = engine::get_engine(Arc::clone(&queue), Config::default()).await;

        let local = build_local();
        let remote = build_remote();
        let store = Arc::new(WriteThroughStore::new(local, queue, sync_engine));
        store.set_remote_store(remote.clone());
        store.set_executor(Arc::new(crate::executor::RemoteStoreExecutor::new(remote)));
        store.initialize().await?;

        let auth = Arc::new(build_auth());
        *slot = Some(Instance {
            mode,
            store: Arc::clone(&store),
            auth: Arc::clone(&auth),
        });
        Ok((store, auth))
    }

    fn queue_path(&self, db_name: &str) -> PathBuf {
        self.base_dir.join(format!("{db_name}_sync_queue.sqlite3"))
    }

    /// Idempotent: disposes the current instance (if any) so the next
    /// `get_or_build` call always starts fresh, regardless of mode.
    pub async fn reset(&self) -> Result<(), SyncError> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            previous.store.close().await?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchops_sync_types::testing::{InMemoryLocalStore, InMemoryRemoteStore};

    struct FakeAuth {
        user_id: String,
    }

    #[tokio::test]
    async fn concurrent_same_mode_builds_share_one_instance() {
        engine::reset_engine().await;
        let dir = tempfile::tempdir().unwrap();
        let factory: Arc<Factory<FakeAuth>> = Arc::new(Factory::new(dir.path()));

        let build = |factory: Arc<Factory<FakeAuth>>| async move {
            factory
                .get_or_build(
                    BuildMode::User("alice".into()),
                    || Arc::new(InMemoryLocalStore::new()),
                    || Arc::new(InMemoryRemoteStore::new()),
                    || FakeAuth { user_id: "alice".into() },
                )
                .await
                .unwrap()
        };

        let (a, b) = tokio::join!(build(Arc::clone(&factory)), build(Arc::clone(&factory)));
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert!(Arc::ptr_eq(&a.1, &b.1));
        assert_eq!(a.1.user_id, "alice");
        factory.reset().await.unwrap();
    }

    #[tokio::test]
    async fn mode_change_tears_down_previous_instance() {
        engine::reset_engine().await;
        let dir = tempfile::tempdir().unwrap();
        let factory: Factory<FakeAuth> = Factory::new(dir.path());

        let (store_a, _) = factory
            .get_or_build(
                BuildMode::User("alice".into()),
                || Arc::new(InMemoryLocalStore::new()),
                || Arc::new(InMemoryRemoteStore::new()),
                || FakeAuth { user_id: "alice".into() },
            )
            .await
            .unwrap();
        assert!(store_a.is_available());

        let (store_b, auth_b) = factory
            .get_or_build(
                BuildMode::User("bob".into()),
                || Arc::new(InMemoryLocalStore::new()),
                || Arc::new(InMemoryRemoteStore::new()),
                || FakeAuth { user_id: "bob".into() },
            )
            .await
            .unwrap();

        assert!(!store_a.is_available());
        assert!(store_b.is_available());
        assert_eq!(auth_b.user_id, "bob");
        factory.reset().await.unwrap();
    }
}
