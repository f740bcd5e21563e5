//! The durable sync queue (Q): a per-user SQLite-backed FIFO with in-queue
//! dedup, as consumed by the write-through wrapper and the sync executor.

use std::path::Path;

use diesel::prelude::*;
use matchops_sync_types::{CoalesceAction, EntityKind, OpKind, Operation, QueueEntry, SyncError};

use crate::db::{self, SqlitePool};
use crate::models::{NewQueueRowDB, QueueRowDB};
use crate::schema::sync_queue;
use crate::writer::{self, WriteHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending_count: i64,
    pub failed_count: i64,
}

pub struct Queue {
    pool: SqlitePool,
    writer: WriteHandle,
}

impl Queue {
    /// Open (creating if absent) the queue database at `db_path`, running
    /// any pending migrations.
    pub fn open(db_path: &Path) -> Result<Self, SyncError> {
        let pool = db::create_pool(db_path)?;
        db::run_migrations(&pool)?;
        let writer = writer::spawn_writer(pool.clone())?;
        Ok(Self { pool, writer })
    }

    /// Apply the §3 dedup rules against any existing non-dispatched entry
    /// sharing `operation`'s `(kind, id)` key, then persist the result.
    pub async fn enqueue(&self, operation: Operation) -> Result<(), SyncError> {
        self.writer
            .exec(move |conn| {
                // No explicit DB transaction: the write-handle actor is the
                // only writer against this connection, so the read-then-write
                // below is already race-free.
                {
                    let existing = sync_queue::table
                        .filter(sync_queue::kind.eq(operation.kind.as_str()))
                        .filter(sync_queue::entity_id.eq(&operation.id))
                        .filter(sync_queue::dispatched.eq(0))
                        .filter(sync_queue::failed.eq(0))
                        .first::<QueueRowDB>(conn)
                        .optional()
                        .map_err(|e| SyncError::Queue(e.to_string()))?;

                    let existing_payload = existing
                        .as_ref()
                        .map(QueueRowDB::payload_value)
                        .transpose()?
                        .flatten();
                    let existing_op = existing
                        .as_ref()
                        .map(|row| crate::models::op_kind_from_str(&row.op))
                        .transpose()?;

                    let plan = matchops_sync_types::plan_coalesce(
                        existing_op.map(|op| (op, existing_payload.as_ref())),
                        operation.op,
                        operation.payload.as_ref(),
                    );

                    match (plan, existing) {
                        (CoalesceAction::Insert, _) => {
                            let row = NewQueueRowDB::from_operation(&operation)?;
                            diesel::insert_into(sync_queue::table)
                                .values(&row)
                                .execute(conn)
                                .map_err(|e| SyncError::Queue(e.to_string()))?;
                        }
                        (CoalesceAction::Cancel, Some(row)) => {
                            diesel::delete(sync_queue::table.find(row.sequence))
                                .execute(conn)
                                .map_err(|e| SyncError::Queue(e.to_string()))?;
                        }
                        (CoalesceAction::Replace { op, payload }, Some(row)) => {
                            let payload_json = payload
                                .as_ref()
                                .map(serde_json::to_string)
                                .transpose()
                                .map_err(|e| SyncError::Queue(e.to_string()))?;
                            diesel::update(sync_queue::table.find(row.sequence))
                                .set((
                                    sync_queue::op.eq(op.as_str()),
                                    sync_queue::payload.eq(payload_json),
                                ))
                                .execute(conn)
                                .map_err(|e| SyncError::Queue(e.to_string()))?;
                        }
                        (CoalesceAction::Cancel | CoalesceAction::Replace { .. }, None) => {
                            // plan_coalesce only returns these when `existing` was Some;
                            // unreachable in practice, but insert rather than panic.
                            let row = NewQueueRowDB::from_operation(&operation)?;
                            diesel::insert_into(sync_queue::table)
                                .values(&row)
                                .execute(conn)
                                .map_err(|e| SyncError::Queue(e.to_string()))?;
                        }
                    }
                    Ok(())
                }
            })
            .await
    }

    /// Every non-dispatched entry, oldest first, for the engine to dispatch.
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, SyncError> {
        let mut conn = db::get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(sync_queue::dispatched.eq(0))
            .filter(sync_queue::failed.eq(0))
            .order(sync_queue::sequence.asc())
            .load::<QueueRowDB>(&mut conn)
            .map_err(|e| SyncError::Queue(e.to_string()))?;
        rows.iter().map(QueueRowDB::to_queue_entry).collect()
    }

    /// All entries of one kind, dispatched or not, for the bulk pusher's
    /// orphan-repair pass.
    pub async fn list_by_kind(&self, kind: EntityKind) -> Result<Vec<QueueEntry>, SyncError> {
        let mut conn = db::get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(sync_queue::kind.eq(kind.as_str()))
            .order(sync_queue::sequence.asc())
            .load::<QueueRowDB>(&mut conn)
            .map_err(|e| SyncError::Queue(e.to_string()))?;
        rows.iter().map(QueueRowDB::to_queue_entry).collect()
    }

    pub async fn mark_dispatched(&self, sequence: i64) -> Result<(), SyncError> {
        self.writer
            .exec(move |conn| {
                diesel::update(sync_queue::table.find(sequence))
                    .set(sync_queue::dispatched.eq(1))
                    .execute(conn)
                    .map_err(|e| SyncError::Queue(e.to_string()))?;
                Ok(())
            })
            .await
    }

    pub async fn mark_succeeded(&self, sequence: i64) -> Result<(), SyncError> {
        self.writer
            .exec(move |conn| {
                diesel::delete(sync_queue::table.find(sequence))
                    .execute(conn)
                    .map_err(|e| SyncError::Queue(e.to_string()))?;
                Ok(())
            })
            .await
    }

    /// Record a failed dispatch attempt and release the entry back to
    /// pending so the engine's retry scheduler can pick it up again.
    pub async fn mark_failed(&self, sequence: i64, error: String) -> Result<(), SyncError> {
        log::debug!("queue entry {sequence} failed: {error}");
        self.writer
            .exec(move |conn| {
                diesel::update(sync_queue::table.find(sequence))
                    .set((
                        sync_queue::dispatched.eq(0),
                        sync_queue::attempts.eq(sync_queue::attempts + 1),
                        sync_queue::last_error.eq(Some(error)),
                    ))
                    .execute(conn)
                    .map_err(|e| SyncError::Queue(e.to_string()))?;
                Ok(())
            })
            .await
    }

    /// Move an entry to the failed shelf (§4.4, `Permanent` classification):
    /// it stops being dispatched or retried, and is counted in `failedCount`
    /// instead of `pendingCount`, but the row is kept for inspection rather
    /// than deleted.
    pub async fn mark_permanently_failed(&self, sequence: i64, error: String) -> Result<(), SyncError> {
        log::warn!("queue entry {sequence} permanently failed: {error}");
        self.writer
            .exec(move |conn| {
                diesel::update(sync_queue::table.find(sequence))
                    .set((
                        sync_queue::dispatched.eq(0),
                        sync_queue::failed.eq(1),
                        sync_queue::last_error.eq(Some(error)),
                    ))
                    .execute(conn)
                    .map_err(|e| SyncError::Queue(e.to_string()))?;
                Ok(())
            })
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats, SyncError> {
        let mut conn = db::get_connection(&self.pool)?;
        let pending_count = sync_queue::table
            .filter(sync_queue::dispatched.eq(0))
            .filter(sync_queue::failed.eq(0))
            .count()
            .get_result(&mut conn)
            .map_err(|e| SyncError::Queue(e.to_string()))?;
        let failed_count = sync_queue::table
            .filter(sync_queue::failed.eq(1))
            .count()
            .get_result(&mut conn)
            .map_err(|e| SyncError::Queue(e.to_string()))?;
        Ok(QueueStats {
            pending_count,
            failed_count,
        })
    }

    /// Drop every queued entry, used by the bulk pusher before it re-derives
    /// the full push set from L (§4.5) and by mode/account switches.
    pub async fn clear(&self) -> Result<(), SyncError> {
        log::info!("clearing sync queue");
        self.writer
            .exec(move |conn| {
                diesel::delete(sync_queue::table)
                    .execute(conn)
                    .map_err(|e| SyncError::Queue(e.to_string()))?;
                Ok(())
            })
            .await
    }

    /// No persistent resource beyond the pool/writer thread to release
    /// explicitly; dropping `self` is enough, this exists for symmetry with
    /// `LocalStore`/`RemoteStore::close`.
    pub async fn close(&self) -> Result<(), SyncError> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_test_queue() -> (tempfile::TempDir, Queue) {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("queue.sqlite3");
        let queue = Queue::open(&db_path).expect("open queue");
        (dir, queue)
    }

    #[tokio::test]
    async fn enqueue_then_list_pending_round_trips() {
        let (_dir, queue) = open_test_queue();
        let op = Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({"id": "p1"})));
        queue.enqueue(op).await.unwrap();

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation.id, "p1");
        assert!(!pending[0].dispatched);
    }

    #[tokio::test]
    async fn create_then_delete_cancels_the_entry() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Delete, None))
            .await
            .unwrap();

        assert!(queue.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatched_entry_is_excluded_from_dedup() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Update, Some(json!({"v": 1}))))
            .await
            .unwrap();
        let first = queue.list_pending().await.unwrap().remove(0);
        queue.mark_dispatched(first.sequence).await.unwrap();

        // A second update while the first is in flight gets its own entry
        // rather than coalescing into the dispatched (possibly already-sent) one.
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Update, Some(json!({"v": 2}))))
            .await
            .unwrap();

        let mut conn = db::get_connection(&queue.pool).unwrap();
        let count: i64 = sync_queue::table
            .filter(sync_queue::entity_id.eq("p1"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn mark_failed_increments_attempts_and_reopens_entry() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        let entry = queue.list_pending().await.unwrap().remove(0);
        queue.mark_dispatched(entry.sequence).await.unwrap();
        queue.mark_failed(entry.sequence, "timeout".into()).await.unwrap();

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn stats_report_pending_and_failed_counts() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p2", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        let entry = queue
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.operation.id == "p1")
            .unwrap();
        queue
            .mark_permanently_failed(entry.sequence, "x".into())
            .await
            .unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.failed_count, 1);
    }

    #[tokio::test]
    async fn permanently_failed_entry_is_excluded_from_pending_and_dedup() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        let entry = queue.list_pending().await.unwrap().remove(0);
        queue.mark_dispatched(entry.sequence).await.unwrap();
        queue
            .mark_permanently_failed(entry.sequence, "rejected".into())
            .await
            .unwrap();

        assert!(queue.list_pending().await.unwrap().is_empty());

        // A fresh Create for the same key gets its own entry rather than
        // coalescing into the terminal failed one.
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({"v": 2}))))
            .await
            .unwrap();
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (_dir, queue) = open_test_queue();
        queue
            .enqueue(Operation::new(EntityKind::Player, "p1", OpKind::Create, Some(json!({}))))
            .await
            .unwrap();
        queue.clear().await.unwrap();
        assert!(queue.list_pending().await.unwrap().is_empty());
    }
}
