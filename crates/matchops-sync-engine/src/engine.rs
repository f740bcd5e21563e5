//! The sync engine (E): a single background cooperative loop owning one Q
//! and one X (§4.4). Realized as one spawned `tokio` task; all mutable
//! engine state is reached only through `SyncEngine`'s own methods, never
//! through raw shared mutability (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use chrono::Utc;
use matchops_sync_queue::Queue;
use matchops_sync_types::RetryClass;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::executor::Executor;
use crate::state::EngineState;
use crate::status::{ListenerRegistry, StatusListener, SyncStatus, Unsubscribe};

struct Inner {
    state: EngineState,
    executor: Option<Arc<dyn Executor>>,
    last_synced_at: Option<chrono::DateTime<Utc>>,
}

/// Process-wide singleton background loop. Each `SyncEngine` is bound to
/// exactly one `Queue` for its lifetime; `get_engine`/`reset_engine` give the
/// write-through wrapper explicit lifecycle control (§4.6, §9) instead of
/// letting the singleton silently outlive the queue that owns it.
pub struct SyncEngine {
    config: Config,
    queue: Arc<Queue>,
    inner: StdMutex<Inner>,
    is_online: AtomicBool,
    /// False only while paused specifically due to `AuthLost` (§7); a bulk-
    /// push pause, for instance, leaves this true.
    cloud_connected: AtomicBool,
    /// Guards one dispatch cycle against concurrent re-entry, grounded in
    /// the reference's `cycle_mutex`. `pause()` and `dispose()` acquire it
    /// too, so they only return once no cycle (including its in-flight
    /// executor call) is running.
    cycle_mutex: AsyncMutex<()>,
    notify: Notify,
    task: StdMutex<Option<JoinHandle<()>>>,
    status_listeners: Arc<ListenerRegistry<SyncStatus>>,
}

impl SyncEngine {
    fn new(queue: Arc<Queue>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue,
            inner: StdMutex::new(Inner {
                state: EngineState::Idle,
                executor: None,
                last_synced_at: None,
            }),
            is_online: AtomicBool::new(true),
            cloud_connected: AtomicBool::new(true),
            cycle_mutex: AsyncMutex::new(()),
            notify: Notify::new(),
            task: StdMutex::new(None),
            status_listeners: ListenerRegistry::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().unwrap().state
    }

    pub fn set_executor(self: &Arc<Self>, executor: Arc<dyn Executor>) {
        self.inner.lock().unwrap().executor = Some(executor);
        self.nudge();
    }

    pub fn set_online(self: &Arc<Self>, online: bool) {
        self.is_online.store(online, Ordering::SeqCst);
        if online {
            self.nudge();
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::SeqCst)
    }

    pub fn cloud_connected(&self) -> bool {
        self.cloud_connected.load(Ordering::SeqCst)
    }

    /// Non-blocking wakeup, collapsing: many nudges during one sleep result
    /// in at most one extra iteration (§4.4), which `tokio::sync::Notify`
    /// gives for free — a permit that is never consumed before the next
    /// `notified().await` is not duplicated by further `notify_one` calls.
    pub fn nudge(&self) {
        self.notify.notify_one();
    }

    /// `Idle -> Running`; spawns the background loop task if it isn't
    /// already running, mirroring the reference's
    /// `ensure_background_engine_started` (`Mutex<Option<JoinHandle<()>>>`
    /// guard, `handle.is_finished()` check before respawning).
    pub fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == EngineState::Idle || inner.state == EngineState::Stopped {
                inner.state = EngineState::Running;
            }
        }
        let mut task = self.task.lock().unwrap();
        let needs_spawn = match task.as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        };
        if needs_spawn {
            let engine = Arc::clone(self);
            *task = Some(tokio::spawn(async move { run_loop(engine).await }));
        }
        self.nudge();
    }

    /// `Running -> Paused`. Waits for any in-flight dispatch cycle to finish
    /// before returning.
    pub async fn pause(self: &Arc<Self>) {
        let _guard = self.cycle_mutex.lock().await;
        let mut inner = self.inner.lock().unwrap();
        if inner.state == EngineState::Running {
            inner.state = EngineState::Paused;
        }
        drop(inner);
        self.broadcast_status();
    }

    /// `Paused -> Running`.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == EngineState::Paused {
                inner.state = EngineState::Running;
            }
        }
        self.cloud_connected.store(true, Ordering::SeqCst);
        self.broadcast_status();
        self.nudge();
    }

    /// Waits for the in-flight call to complete (bounded by
    /// `Config::dispose_timeout`), then stops (§4.4, §5).
    pub async fn dispose(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != EngineState::Stopped {
                inner.state = EngineState::Draining;
            }
        }
        self.nudge();
        let wait = async {
            let _guard = self.cycle_mutex.lock().await;
        };
        let _ = tokio::time::timeout(self.config.dispose_timeout, wait).await;
        self.inner.lock().unwrap().state = EngineState::Stopped;
        self.broadcast_status();
        self.abort_task();
    }

    /// Interrupts mid-flight if necessary; used only when the surrounding W
    /// is being torn down for account switch or `clearAllUserData` (§4.4).
    pub fn stop(self: &Arc<Self>) {
        self.inner.lock().unwrap().state = EngineState::Stopped;
        self.reset_cloud_connected();
        self.broadcast_status();
        self.abort_task();
        self.nudge();
    }

    fn abort_task(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn subscribe_status(self: &Arc<Self>, listener: StatusListener) -> Unsubscribe<SyncStatus> {
        self.status_listeners.subscribe(listener)
    }

    pub async fn status(&self) -> SyncStatus {
        let stats = self.queue.stats().await.unwrap_or_default();
        let inner = self.inner.lock().unwrap();
        SyncStatus {
            state: inner.state,
            pending_count: stats.pending_count,
            failed_count: stats.failed_count,
            last_synced_at: inner.last_synced_at,
            is_online: self.is_online(),
            cloud_connected: self.cloud_connected(),
        }
    }

    /// `pause()`/`start()` leave `cloud_connected` untouched (only an
    /// `AuthLost` classification or an explicit `resume()` changes it);
    /// `stop()`/`reset_engine()` re-arm it so a fresh engine never inherits
    /// a stale auth-lost flag.
    fn reset_cloud_connected(&self) {
        self.cloud_connected.store(true, Ordering::SeqCst);
    }

    /// Fires the status broadcast on its own task rather than inline, so
    /// callers on the hot dispatch path never block on listener work, and
    /// sync callers like `resume()`/`stop()` don't need to become async
    /// just to read `Q.stats()`.
    fn broadcast_status(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let stats = engine.queue.stats().await.unwrap_or_default();
            let inner = engine.inner.lock().unwrap();
            let status = SyncStatus {
                state: inner.state,
                pending_count: stats.pending_count,
                failed_count: stats.failed_count,
                last_synced_at: inner.last_synced_at,
                is_online: engine.is_online.load(Ordering::SeqCst),
                cloud_connected: engine.cloud_connected.load(Ordering::SeqCst),
            };
            drop(inner);
            engine.status_listeners.notify(&status);
        });
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.inner.lock().unwrap().executor.clone()
    }

    fn set_last_synced_at(&self, at: chrono::DateTime<Utc>) {
        self.inner.lock().unwrap().last_synced_at = Some(at);
    }
}

/// The background dispatch loop itself (§4.4 "Main loop").
async fn run_loop(engine: Arc<SyncEngine>) {
    loop {
        if engine.state() == EngineState::Stopped {
            return;
        }
        if !engine.state().is_dispatching() {
            engine.notify.notified().await;
            continue;
        }

        let guard = engine.cycle_mutex.lock().await;
        let ran_cycle = run_one_cycle(&engine).await;
        drop(guard);

        if engine.state() == EngineState::Draining {
            // dispose() is waiting on the cycle mutex; let it observe the
            // drain and transition to Stopped itself.
            return;
        }

        if !ran_cycle {
            tokio::select! {
                _ = engine.notify.notified() => {}
                _ = tokio::time::sleep(engine.config.poll_interval()) => {}
            }
        }
    }
}

/// Runs (at most) one dispatch step. Returns whether work was actually
/// attempted, so the caller knows whether to sleep before the next
/// iteration.
async fn run_one_cycle(engine: &Arc<SyncEngine>) -> bool {
    if !engine.is_online() {
        return false;
    }
    let Some(executor) = engine.executor() else {
        return false;
    };

    let pending = match engine.queue.list_pending().await {
        Ok(pending) => pending,
        Err(e) => {
            log::error!("sync engine failed to read pending queue entries: {e}");
            return false;
        }
    };
    // Oldest non-dispatched entry, respecting per-entity FIFO: since the
    // queue only ever holds one live (non-terminal) entry per (kind, id)
    // except across a delete/recreate boundary, taking the globally oldest
    // entry already preserves per-key order.
    let Some(entry) = pending.into_iter().next() else {
        return false;
    };

    if let Err(e) = engine.queue.mark_dispatched(entry.sequence).await {
        log::error!("sync engine failed to mark entry {} dispatched: {e}", entry.sequence);
        return false;
    }

    log::debug!(
        "dispatching {} {} ({:?}), attempt {}",
        entry.operation.kind,
        entry.operation.id,
        entry.operation.op,
        entry.attempts + 1
    );

    match executor.dispatch(&entry.operation).await {
        Ok(()) => {
            if let Err(e) = engine.queue.mark_succeeded(entry.sequence).await {
                log::error!("sync engine failed to clear succeeded entry {}: {e}", entry.sequence);
            }
            engine.set_last_synced_at(Utc::now());
            engine.broadcast_status();
        }
        Err(e) => {
            log::warn!(
                "dispatch failed for {} {}: {e}",
                entry.operation.kind,
                entry.operation.id
            );
            match e.retry_class() {
                RetryClass::Retryable => {
                    if entry.attempts + 1 >= engine.config.max_transient_attempts {
                        let _ = engine
                            .queue
                            .mark_permanently_failed(entry.sequence, e.to_string())
                            .await;
                    } else {
                        let _ = engine.queue.mark_failed(entry.sequence, e.to_string()).await;
                        let backoff = engine.config.backoff_for_attempt(entry.attempts + 1);
                        log::debug!("retrying entry {} in {:?}", entry.sequence, backoff);
                        tokio::time::sleep(backoff).await;
                    }
                }
                RetryClass::Permanent => {
                    let _ = engine
                        .queue
                        .mark_permanently_failed(entry.sequence, e.to_string())
                        .await;
                }
                RetryClass::ReauthRequired => {
                    let _ = engine.queue.mark_failed(entry.sequence, e.to_string()).await;
                    let mut inner = engine.inner.lock().unwrap();
                    if inner.state == EngineState::Running {
                        inner.state = EngineState::Paused;
                    }
                    drop(inner);
                    engine.cloud_connected.store(false, Ordering::SeqCst);
                }
            }
            engine.broadcast_status();
        }
    }
    true
}

/// The process-wide singleton slot (§4.6, §9): `getEngine(queue)` returns
/// the current instance or constructs one bound to `queue`; `resetEngine()`
/// disposes and nulls it so the next `W` observes a fresh engine view over
/// its own queue.
static SINGLETON: OnceLock<AsyncMutex<Option<Arc<SyncEngine>>>> = OnceLock::new();

fn singleton_slot() -> &'static AsyncMutex<Option<Arc<SyncEngine>>> {
    SINGLETON.get_or_init(|| AsyncMutex::new(None))
}

/// Returns the current engine singleton, constructing one bound to `queue`
/// if none exists yet.
pub async fn get_engine(queue: Arc<Queue>, config: Config) -> Arc<SyncEngine> {
    let mut slot = singleton_slot().lock().await;
    if let Some(existing) = slot.as_ref() {
        return Arc::clone(existing);
    }
    let engine = SyncEngine::new(queue, config);
    *slot = Some(Arc::clone(&engine));
    engine
}

/// Disposes the current engine (if any) and clears the singleton so the
/// next `get_engine` call binds to a fresh queue. Idempotent.
pub async fn reset_engine() {
    let mut slot = singleton_slot().lock().await;
    if let Some(engine) = slot.take() {
        engine.stop();
    }
}
