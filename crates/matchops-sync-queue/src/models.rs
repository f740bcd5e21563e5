//! Database model for the durable sync queue table.

use diesel::prelude::*;
use matchops_sync_types::{EntityKind, OpKind, Operation, QueueEntry, SyncError};

use crate::schema::sync_queue;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(primary_key(sequence))]
#[diesel(table_name = sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueRowDB {
    pub sequence: i64,
    pub kind: String,
    pub entity_id: String,
    pub op: String,
    pub payload: Option<String>,
    pub enqueued_at: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dispatched: i32,
    pub failed: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = sync_queue)]
pub struct NewQueueRowDB {
    pub kind: String,
    pub entity_id: String,
    pub op: String,
    pub payload: Option<String>,
    pub enqueued_at: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dispatched: i32,
    pub failed: i32,
}

impl NewQueueRowDB {
    pub fn from_operation(op: &Operation) -> Result<Self, SyncError> {
        Ok(Self {
            kind: op.kind.as_str().to_string(),
            entity_id: op.id.clone(),
            op: op.op.as_str().to_string(),
            payload: op
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| SyncError::Queue(format!("payload serialize failed: {e}")))?,
            enqueued_at: op.enqueued_at.to_rfc3339(),
            attempts: 0,
            last_error: None,
            dispatched: 0,
            failed: 0,
        })
    }
}

impl QueueRowDB {
    pub fn to_queue_entry(&self) -> Result<QueueEntry, SyncError> {
        let kind: EntityKind = self
            .kind
            .parse()
            .map_err(|e| SyncError::Queue(format!("corrupt queue row kind: {e}")))?;
        let op_kind = op_kind_from_str(&self.op)?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| SyncError::Queue(format!("payload deserialize failed: {e}")))?;
        let enqueued_at = chrono::DateTime::parse_from_rfc3339(&self.enqueued_at)
            .map_err(|e| SyncError::Queue(format!("corrupt queue row timestamp: {e}")))?
            .with_timezone(&chrono::Utc);

        Ok(QueueEntry {
            sequence: self.sequence,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            dispatched: self.dispatched != 0,
            failed: self.failed != 0,
            operation: Operation {
                kind,
                id: self.entity_id.clone(),
                op: op_kind,
                payload,
                enqueued_at,
            },
        })
    }

    pub fn payload_value(&self) -> Result<Option<serde_json::Value>, SyncError> {
        self.payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| SyncError::Queue(format!("payload deserialize failed: {e}")))
    }
}

pub fn op_kind_from_str(s: &str) -> Result<OpKind, SyncError> {
    match s {
        "create" => Ok(OpKind::Create),
        "update" => Ok(OpKind::Update),
        "delete" => Ok(OpKind::Delete),
        other => Err(SyncError::Queue(format!("corrupt queue row op '{other}'"))),
    }
}
