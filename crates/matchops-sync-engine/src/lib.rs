//! Background sync runtime: the executor (X), the sync engine (E), the bulk
//! pusher (B), the write-through wrapper (W), and the process-wide factory.
//!
//! `matchops-sync-types` defines the vocabulary (entity kinds, operations,
//! errors, the `LocalStore`/`RemoteStore` traits); `matchops-sync-queue`
//! durably persists operations; this crate is where they're dispatched.

mod bulk;
mod config;
mod engine;
mod executor;
mod factory;
mod state;
mod status;
mod write_through;

pub use bulk::{push_all_to_cloud, PushSummary};
pub use config::Config;
pub use engine::{get_engine, reset_engine, SyncEngine};
pub use executor::{Executor, RemoteStoreExecutor};
pub use factory::{BuildMode, Factory};
pub use state::EngineState;
pub use status::{QueueErrorEvent, QueueErrorListener, StatusListener, SyncStatus, Unsubscribe};
pub use write_through::WriteThroughStore;
