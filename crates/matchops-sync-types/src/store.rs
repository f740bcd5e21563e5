use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::kind::EntityKind;

/// One mutation to the events list of a single Game (§4.1: "per-event
/// mutations on a Game ... a single `Update` for the whole Game").
#[derive(Debug, Clone)]
pub enum GameEventOp {
    Add(Value),
    Update(Value),
    Remove(String),
}

/// The local embedded database's entity CRUD surface, as consumed by the
/// write-through wrapper (§6). This crate never implements a real on-disk
/// store: applications own L and implement this trait over whatever storage
/// engine they already have. See [`crate::testing::InMemoryLocalStore`] for
/// a reference implementation used by this workspace's own tests.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn create(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError>;

    /// Returns `Ok(None)` when there is no such entity to update (§4.1: the
    /// write-through wrapper skips the enqueue in that case).
    async fn update(&self, kind: EntityKind, id: &str, payload: Value) -> Result<Option<Value>, SyncError>;

    /// Returns whether the entity existed prior to the call.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, SyncError>;

    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<Value, SyncError>;

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Value>, SyncError>;

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, SyncError>;

    async fn set_team_roster(&self, team_id: &str, roster: Value) -> Result<Value, SyncError>;

    /// Applies one event mutation and returns the whole updated Game.
    async fn apply_game_event(&self, game_id: &str, op: GameEventOp) -> Result<Value, SyncError>;

    /// Batch game save with settle-all semantics: one `Result` per input
    /// game, in the same order, so a single failure never aborts the batch.
    async fn save_all_games(&self, games: Vec<Value>) -> Vec<Result<Value, SyncError>>;

    /// Ephemeral, local-only timer state; never queued for sync (§4.1).
    async fn save_timer_state(&self, game_id: &str, state: Value) -> Result<(), SyncError>;

    async fn get_timer_state(&self, game_id: &str) -> Result<Option<Value>, SyncError>;

    async fn clear_all(&self) -> Result<(), SyncError>;
}

/// The remote authoritative store's CRUD surface, as consumed by the sync
/// executor (§4.3) and the bulk pusher (§4.5). `upsert` MUST be idempotent
/// (§6) because the write-through wrapper always enqueues `upsert*` calls as
/// `Create`, relying on idempotent replay.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn initialize(&self) -> Result<(), SyncError>;

    async fn close(&self) -> Result<(), SyncError>;

    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<(), SyncError>;

    /// `extra` carries `{"playerId": ...}` for `PlayerAdjustment` deletes,
    /// `None` for every other kind (§3, §4.3).
    async fn delete(&self, kind: EntityKind, id: &str, extra: Option<Value>) -> Result<(), SyncError>;

    async fn clear_all_user_data(&self) -> Result<(), SyncError>;
}
