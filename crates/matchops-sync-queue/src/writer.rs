//! Single-writer actor serializing all mutations against a queue database.
//!
//! SQLite tolerates one writer at a time; rather than contend on a mutex per
//! call, every write runs on one dedicated thread that owns its own
//! connection, mirroring how the teacher's storage layer isolates writes
//! behind a `WriteHandle`.

use diesel::sqlite::SqliteConnection;
use matchops_sync_types::SyncError;
use tokio::sync::{mpsc, oneshot};

use crate::db::SqlitePool;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    pub async fn exec<F, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, SyncError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        });
        self.tx
            .send(job)
            .map_err(|_| SyncError::Queue("queue writer thread has shut down".into()))?;
        reply_rx
            .await
            .map_err(|_| SyncError::Queue("queue writer dropped the reply channel".into()))?
    }
}

pub fn spawn_writer(pool: SqlitePool) -> Result<WriteHandle, SyncError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let mut conn = crate::db::get_connection(&pool)?;
    std::thread::Builder::new()
        .name("sync-queue-writer".into())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                job(&mut conn);
            }
        })
        .map_err(|e| SyncError::Queue(format!("failed to spawn queue writer thread: {e}")))?;
    Ok(WriteHandle { tx })
}
