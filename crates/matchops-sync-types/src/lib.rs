//! Shared vocabulary for the local-first write-through data store: entity
//! kinds, queued operations and their dedup rules, the error taxonomy, the
//! `LocalStore`/`RemoteStore` interfaces, and the database naming boundary.
//!
//! This crate has no notion of a background engine or a durable queue; it is
//! the pure, persistence-free core that `matchops-sync-queue` and
//! `matchops-sync-engine` build on.

pub mod db_naming;
pub mod error;
pub mod kind;
pub mod operation;
pub mod store;
pub mod timestamp;

#[cfg(feature = "testing")]
pub mod testing;

pub use error::{classify_http_status, RetryClass, Result, SyncError};
pub use kind::EntityKind;
pub use operation::{plan_coalesce, CoalesceAction, OpKind, Operation, QueueEntry};
pub use store::{GameEventOp, LocalStore, RemoteStore};
pub use timestamp::equal_ignoring_timestamps;
