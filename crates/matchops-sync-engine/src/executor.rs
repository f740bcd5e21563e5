//! The sync executor (X): a pure, stateless mapping from one queue entry to
//! the matching `RemoteStore` call.

use std::sync::Arc;

use async_trait::async_trait;
use matchops_sync_types::{EntityKind, OpKind, Operation, RemoteStore, SyncError};

/// `X(entry) -> Result<(), SyncError>`. Implementations MUST be side-effect
/// free on local state (§4.3): they only ever call R.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn dispatch(&self, operation: &Operation) -> Result<(), SyncError>;
}

/// The default executor this crate ships: a thin `RemoteStore`-backed
/// dispatcher. Callers needing a different remote transport either implement
/// `RemoteStore` and reuse this dispatch logic, or supply an entirely custom
/// `Executor`.
pub struct RemoteStoreExecutor {
    remote: Arc<dyn RemoteStore>,
}

impl RemoteStoreExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Executor for RemoteStoreExecutor {
    async fn dispatch(&self, operation: &Operation) -> Result<(), SyncError> {
        match operation.op {
            OpKind::Create | OpKind::Update => {
                let payload = operation.payload.clone().ok_or_else(|| {
                    SyncError::PermanentRemote(format!(
                        "{} {} carries no payload to upsert",
                        operation.kind, operation.id
                    ))
                })?;
                self.remote.upsert(operation.kind, payload).await
            }
            OpKind::Delete => {
                let extra = player_adjustment_extra(operation)?;
                self.remote.delete(operation.kind, &operation.id, extra).await
            }
        }
    }
}

/// Pull the `{playerId}` extra a `PlayerAdjustment` delete carries (§3, §4.3);
/// every other kind deletes with no extra.
fn player_adjustment_extra(operation: &Operation) -> Result<Option<serde_json::Value>, SyncError> {
    if operation.kind != EntityKind::PlayerAdjustment {
        return Ok(None);
    }
    match &operation.payload {
        Some(extra) => Ok(Some(extra.clone())),
        None => Err(SyncError::PermanentRemote(format!(
            "player adjustment {} delete is missing its playerId extra",
            operation.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchops_sync_types::testing::InMemoryRemoteStore;
    use serde_json::json;

    fn operation(kind: EntityKind, op: OpKind, payload: Option<serde_json::Value>) -> Operation {
        Operation::new(kind, "e1", op, payload)
    }

    #[tokio::test]
    async fn create_and_update_both_upsert() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let executor = RemoteStoreExecutor::new(remote.clone());

        executor
            .dispatch(&operation(EntityKind::Player, OpKind::Create, Some(json!({"id": "e1"}))))
            .await
            .unwrap();
        assert_eq!(remote.call_count(EntityKind::Player, "e1"), 1);

        executor
            .dispatch(&operation(EntityKind::Player, OpKind::Update, Some(json!({"id": "e1", "v": 2}))))
            .await
            .unwrap();
        assert_eq!(remote.call_count(EntityKind::Player, "e1"), 2);
    }

    #[tokio::test]
    async fn plain_delete_carries_no_extra() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let executor = RemoteStoreExecutor::new(remote.clone());

        executor
            .dispatch(&operation(EntityKind::Player, OpKind::Delete, None))
            .await
            .unwrap();
        assert_eq!(remote.call_count(EntityKind::Player, "e1"), 1);
    }

    #[tokio::test]
    async fn player_adjustment_delete_forwards_player_id_extra() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let executor = RemoteStoreExecutor::new(remote.clone());

        executor
            .dispatch(&operation(
                EntityKind::PlayerAdjustment,
                OpKind::Delete,
                Some(json!({"playerId": "p1"})),
            ))
            .await
            .unwrap();
        assert_eq!(remote.call_count(EntityKind::PlayerAdjustment, "e1"), 1);
    }

    #[tokio::test]
    async fn player_adjustment_delete_without_extra_is_rejected() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let executor = RemoteStoreExecutor::new(remote);

        let result = executor
            .dispatch(&operation(EntityKind::PlayerAdjustment, OpKind::Delete, None))
            .await;
        assert!(result.is_err());
    }
}
