//! The write-through wrapper (W, §4.1): fans each mutation to L then
//! records a matching queue entry in Q, exposing the same CRUD surface
//! `LocalStore` does to application callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use matchops_sync_types::{
    equal_ignoring_timestamps, EntityKind, GameEventOp, LocalStore, OpKind, Operation, RemoteStore,
    SyncError,
};
use serde_json::Value;

use crate::bulk::{self, PushSummary};
use crate::engine::SyncEngine;
use crate::status::{QueueErrorEvent, QueueErrorListener, Unsubscribe};
use crate::status::{ListenerRegistry, StatusListener, SyncStatus};

pub const BACKEND_NAME: &str = "synced";

pub struct WriteThroughStore {
    local: Arc<dyn LocalStore>,
    queue: Arc<matchops_sync_queue::Queue>,
    engine: Arc<SyncEngine>,
    remote: StdMutex<Option<Arc<dyn RemoteStore>>>,
    initialized: AtomicBool,
    closed: AtomicBool,
    queue_error_listeners: Arc<ListenerRegistry<QueueErrorEvent>>,
}

impl WriteThroughStore {
    pub fn new(local: Arc<dyn LocalStore>, queue: Arc<matchops_sync_queue::Queue>, engine: Arc<SyncEngine>) -> Self {
        Self {
            local,
            queue,
            engine,
            remote: StdMutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queue_error_listeners: ListenerRegistry::new(),
        }
    }

    pub async fn initialize(&self) -> Result<(), SyncError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(remote) = self.remote.lock().unwrap().clone() {
            remote.initialize().await?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn get_backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    pub fn get_local_store(&self) -> Arc<dyn LocalStore> {
        Arc::clone(&self.local)
    }

    /// No-ops once closed (§4.1 guards).
    pub fn set_executor(&self, executor: Arc<dyn crate::executor::Executor>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.engine.set_executor(executor);
    }

    /// No-ops once closed (§4.1 guards).
    pub fn set_remote_store(&self, remote: Arc<dyn RemoteStore>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        *self.remote.lock().unwrap() = Some(remote);
    }

    pub fn start_sync(&self) {
        self.engine.start();
    }

    pub async fn stop_sync(&self) {
        self.engine.pause().await;
    }

    pub async fn get_sync_status(&self) -> SyncStatus {
        self.engine.status().await
    }

    pub fn on_sync_status_change(&self, listener: StatusListener) -> Unsubscribe<SyncStatus> {
        self.engine.subscribe_status(listener)
    }

    pub fn on_queue_error(&self, listener: QueueErrorListener) -> Unsubscribe<QueueErrorEvent> {
        self.queue_error_listeners.subscribe(listener)
    }

    /// §4.1: local apply strictly happens-before queue record; enqueue
    /// failure never rolls back the local write, and is reported rather
    /// than swallowed.
    async fn enqueue_or_report(&self, operation: Operation) {
        if !self.initialized.load(Ordering::SeqCst) {
            log::warn!(
                "enqueue skipped for {} {} before initialize() completed",
                operation.kind,
                operation.id
            );
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            log::warn!("enqueue skipped for {} {} after close()", operation.kind, operation.id);
            return;
        }
        let kind = operation.kind;
        let id = operation.id.clone();
        let op = operation.op;
        match self.queue.enqueue(operation).await {
            Ok(()) => self.engine.nudge(),
            Err(e) => {
                log::error!("queue enqueue failed for {kind} {id}: {e}");
                self.queue_error_listeners.notify(&QueueErrorEvent {
                    kind,
                    id,
                    op,
                    error_message: e.to_string(),
                });
            }
        }
    }

    fn guard_closed(&self) -> Result<(), SyncError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Precondition("write-through store is closed".into()));
        }
        Ok(())
    }

    pub async fn create(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let stored = self.local.create(kind, payload).await?;
        let id = stored.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.enqueue_or_report(Operation::new(kind, id, OpKind::Create, Some(stored.clone())))
            .await;
        Ok(stored)
    }

    pub async fn update(&self, kind: EntityKind, id: &str, payload: Value) -> Result<Option<Value>, SyncError> {
        self.guard_closed()?;
        let result = self.local.update(kind, id, payload).await?;
        if let Some(stored) = &result {
            self.enqueue_or_report(Operation::new(kind, id, OpKind::Update, Some(stored.clone())))
                .await;
        }
        Ok(result)
    }

    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, SyncError> {
        self.guard_closed()?;
        let existed = self.local.delete(kind, id).await?;
        if existed {
            self.enqueue_or_report(Operation::new(kind, id, OpKind::Delete, None)).await;
        }
        Ok(existed)
    }

    /// `PlayerAdjustment` delete carries `{playerId}` in its queued payload
    /// because its remote identity is composite (§3); every other kind
    /// deletes through [`Self::delete`].
    pub async fn delete_player_adjustment(&self, id: &str, player_id: &str) -> Result<bool, SyncError> {
        self.guard_closed()?;
        let existed = self.local.delete(EntityKind::PlayerAdjustment, id).await?;
        if existed {
            self.enqueue_or_report(Operation::new(
                EntityKind::PlayerAdjustment,
                id,
                OpKind::Delete,
                Some(serde_json::json!({ "playerId": player_id })),
            ))
            .await;
        }
        Ok(existed)
    }

    /// §4.1: `upsert*` is always enqueued as `Create`, so that a later
    /// delete still cancels the pair (§3 rule 3) — the executor/remote
    /// treats `Create` as an idempotent upsert.
    pub async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let stored = self.local.upsert(kind, payload).await?;
        let id = stored.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        self.enqueue_or_report(Operation::new(kind, id, OpKind::Create, Some(stored.clone())))
            .await;
        Ok(stored)
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, SyncError> {
        self.local.get(kind, id).await
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, SyncError> {
        self.local.list(kind).await
    }

    pub async fn set_team_roster(&self, team_id: &str, roster: Value) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let stored = self.local.set_team_roster(team_id, roster).await?;
        self.enqueue_or_report(Operation::new(
            EntityKind::TeamRoster,
            team_id,
            OpKind::Update,
            Some(stored.clone()),
        ))
        .await;
        Ok(stored)
    }

    /// Per-event Game mutations collapse to a single `Update` for the whole
    /// Game (§4.1).
    pub async fn apply_game_event(&self, game_id: &str, op: GameEventOp) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let game = self.local.apply_game_event(game_id, op).await?;
        self.enqueue_or_report(Operation::new(EntityKind::Game, game_id, OpKind::Update, Some(game.clone())))
            .await;
        Ok(game)
    }

    /// Settle-all batch save: fans out one `Update` per game, and an
    /// individual enqueue failure never aborts the batch (§4.1).
    pub async fn save_all_games(&self, games: Vec<Value>) -> Vec<Result<Value, SyncError>> {
        if self.guard_closed().is_err() {
            return games
                .into_iter()
                .map(|_| Err(SyncError::Precondition("write-through store is closed".into())))
                .collect();
        }
        let results = self.local.save_all_games(games).await;
        let mut out = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(stored) => {
                    let id = stored.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                    self.enqueue_or_report(Operation::new(EntityKind::Game, id, OpKind::Update, Some(stored.clone())))
                        .await;
                    out.push(Ok(stored));
                }
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// §4.1: Settings and Game saves compare the new value to the prior one
    /// with timestamps stripped; an identical payload skips both the local
    /// write and the enqueue so a no-op save can never win a future
    /// last-write-wins conflict against a genuinely newer remote copy.
    pub async fn save_settings(&self, payload: Value) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let singleton_id = EntityKind::Settings.singleton_id().unwrap_or("app");
        if let Some(prior) = self.local.get(EntityKind::Settings, singleton_id).await? {
            if equal_ignoring_timestamps(&payload, &prior) {
                return Ok(prior);
            }
        }
        let stored = self.local.upsert(EntityKind::Settings, payload).await?;
        self.enqueue_or_report(Operation::new(
            EntityKind::Settings,
            singleton_id,
            OpKind::Create,
            Some(stored.clone()),
        ))
        .await;
        Ok(stored)
    }

    /// Same no-op detection as [`Self::save_settings`], keyed by the game's
    /// own id rather than a fixed singleton id.
    pub async fn save_game(&self, payload: Value) -> Result<Value, SyncError> {
        self.guard_closed()?;
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation("game payload is missing an id".into()))?
            .to_string();
        if let Some(prior) = self.local.get(EntityKind::Game, &id).await? {
            if equal_ignoring_timestamps(&payload, &prior) {
                return Ok(prior);
            }
        }
        let stored = self.local.upsert(EntityKind::Game, payload).await?;
        self.enqueue_or_report(Operation::new(EntityKind::Game, id, OpKind::Create, Some(stored.clone())))
            .await;
        Ok(stored)
    }

    /// Ephemeral, local-only; never queued for sync (§4.1).
    pub async fn save_timer_state(&self, game_id: &str, state: Value) -> Result<(), SyncError> {
        self.local.save_timer_state(game_id, state).await
    }

    pub async fn get_timer_state(&self, game_id: &str) -> Result<Option<Value>, SyncError> {
        self.local.get_timer_state(game_id).await
    }

    pub async fn push_all_to_cloud(&self) -> Result<PushSummary, SyncError> {
        let remote = self
            .remote
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Precondition("no remote store attached for bulk push".into()))?;
        bulk::push_all_to_cloud(
            &self.local,
            &remote,
            &self.queue,
            &self.engine,
            &crate::config::Config::default(),
        )
        .await
    }

    /// Pauses E (remembering its prior running state), clears Q, clears R
    /// (if attached) and L, in that order, then resumes E if it was running
    /// before (§6). Idempotent: running it twice is indistinguishable from
    /// once, since a second run observes an already-empty Q and L.
    pub async fn clear_all_user_data(&self) -> Result<(), SyncError> {
        let was_running = self.engine.state() == crate::state::EngineState::Running;
        self.engine.pause().await;

        self.queue.clear().await?;
        if let Some(remote) = self.remote.lock().unwrap().clone() {
            remote.clear_all_user_data().await?;
        }
        self.local.clear_all().await?;

        if was_running {
            self.engine.resume();
        }
        Ok(())
    }

    /// Releases the engine singleton so the next `WriteThroughStore`
    /// observes a fresh `E` over its own `Q` (§3 "Lifecycle ownership", §9).
    pub async fn close(&self) -> Result<(), SyncError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        crate::engine::reset_engine().await;
        self.queue.close().await?;
        if let Some(remote) = self.remote.lock().unwrap().take() {
            remote.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchops_sync_types::testing::{InMemoryLocalStore, InMemoryRemoteStore};
    use serde_json::json;
    use tempfile::tempdir;

    async fn new_store() -> (tempfile::TempDir, WriteThroughStore) {
        crate::engine::reset_engine().await;
        let dir = tempdir().unwrap();
        let queue = Arc::new(matchops_sync_queue::Queue::open(&dir.path().join("q.sqlite3")).unwrap());
        let engine = crate::engine::get_engine(Arc::clone(&queue), crate::config::Config::default()).await;
        let local: Arc<dyn LocalStore> = Arc::new(InMemoryLocalStore::new());
        let store = WriteThroughStore::new(local, queue, engine);
        store.initialize().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn offline_write_then_reconnect_enqueues_then_drains() {
        let (_dir, store) = new_store().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        store.set_remote_store(remote.clone());
        store.set_executor(Arc::new(crate::executor::RemoteStoreExecutor::new(remote.clone())));
        store.engine.set_online(false);

        let created = store.create(EntityKind::Player, json!({"id": "p1", "name": "Pat"})).await.unwrap();
        assert_eq!(created.get("name").and_then(Value::as_str), Some("Pat"));
        assert_eq!(store.get_sync_status().await.pending_count, 1);
        assert_eq!(remote.calls().len(), 0);

        store.engine.set_online(true);
        store.start_sync();
        let mut waited = 0;
        while store.get_sync_status().await.pending_count != 0 && waited < 50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            waited += 1;
        }
        assert_eq!(store.get_sync_status().await.pending_count, 0);
        assert_eq!(remote.call_count(EntityKind::Player, "p1"), 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_then_delete_cancels_before_dispatch() {
        let (_dir, store) = new_store().await;
        let remote = Arc::new(InMemoryRemoteStore::new());
        store.set_remote_store(remote.clone());
        store.set_executor(Arc::new(crate::executor::RemoteStoreExecutor::new(remote.clone())));

        store.upsert(EntityKind::Player, json!({"id": "p2", "name": "X"})).await.unwrap();
        store.delete(EntityKind::Player, "p2").await.unwrap();

        assert_eq!(store.get_sync_status().await.pending_count, 0);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn settings_no_op_save_skips_local_write_and_queue() {
        let (_dir, store) = new_store().await;
        store
            .save_settings(json!({"theme": "dark", "updatedAt": "T1"}))
            .await
            .unwrap();
        assert_eq!(store.get_sync_status().await.pending_count, 1);

        // Drain that first enqueue so the test isolates the second, no-op call.
        store.queue.clear().await.unwrap();

        let result = store
            .save_settings(json!({"theme": "dark", "updatedAt": "T2"}))
            .await
            .unwrap();
        assert_eq!(result.get("updatedAt").and_then(Value::as_str), Some("T1"));
        assert_eq!(store.get_sync_status().await.pending_count, 0);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn user_switch_drops_pending_entries_from_the_prior_store() {
        crate::engine::reset_engine().await;
        let dir_a = tempdir().unwrap();
        let queue_a = Arc::new(matchops_sync_queue::Queue::open(&dir_a.path().join("q.sqlite3")).unwrap());
        let engine_a = crate::engine::get_engine(Arc::clone(&queue_a), crate::config::Config::default()).await;
        let local_a: Arc<dyn LocalStore> = Arc::new(InMemoryLocalStore::new());
        let store_a = WriteThroughStore::new(local_a, Arc::clone(&queue_a), engine_a);
        store_a.initialize().await.unwrap();
        // Never online, so these entries are still pending when we close.
        for i in 0..3 {
            store_a
                .create(EntityKind::Player, json!({"id": format!("a{i}"), "name": "A"}))
                .await
                .unwrap();
        }
        assert_eq!(store_a.get_sync_status().await.pending_count, 3);
        store_a.close().await.unwrap();

        let dir_b = tempdir().unwrap();
        let queue_b = Arc::new(matchops_sync_queue::Queue::open(&dir_b.path().join("q.sqlite3")).unwrap());
        let engine_b = crate::engine::get_engine(Arc::clone(&queue_b), crate::config::Config::default()).await;
        let local_b: Arc<dyn LocalStore> = Arc::new(InMemoryLocalStore::new());
        let store_b = WriteThroughStore::new(local_b, queue_b, engine_b);
        store_b.initialize().await.unwrap();

        let remote = Arc::new(InMemoryRemoteStore::new());
        store_b.set_remote_store(remote.clone());
        store_b.set_executor(Arc::new(crate::executor::RemoteStoreExecutor::new(remote.clone())));
        store_b.engine.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(store_b.get_sync_status().await.pending_count, 0);
        assert_eq!(remote.calls().len(), 0);
        store_b.close().await.unwrap();
    }
}
