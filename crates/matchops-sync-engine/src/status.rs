//! Status snapshots and the listener machinery W and E expose (§6).

use chrono::{DateTime, Utc};
use matchops_sync_types::{EntityKind, OpKind};

use crate::state::EngineState;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: EngineState,
    pub pending_count: i64,
    pub failed_count: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub cloud_connected: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            pending_count: 0,
            failed_count: 0,
            last_synced_at: None,
            is_online: true,
            cloud_connected: true,
        }
    }
}

/// Delivered to `onQueueError` listeners when W's enqueue fails (§4.1, §7
/// category 4): the local write already succeeded, so this is purely
/// informational.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueErrorEvent {
    pub kind: EntityKind,
    pub id: String,
    pub op: OpKind,
    pub error_message: String,
}

pub type StatusListener = Box<dyn Fn(&SyncStatus) + Send + Sync>;
pub type QueueErrorListener = Box<dyn Fn(&QueueErrorEvent) + Send + Sync>;

/// A simple registry used by both W (queue-error listeners) and E (status
/// listeners). A listener that panics or whose closure body misbehaves must
/// never prevent notification of the remaining listeners (§5); since Rust
/// closures don't throw the way the reference's JS listeners do, the
/// isolation here is enforced with `catch_unwind` around each call.
#[derive(Default)]
pub struct ListenerRegistry<E> {
    listeners: std::sync::Mutex<Vec<(u64, Box<dyn Fn(&E) + Send + Sync>)>>,
    next_id: std::sync::atomic::AtomicU64,
}

pub struct Unsubscribe<E> {
    id: u64,
    registry: std::sync::Weak<ListenerRegistry<E>>,
}

impl<E> Unsubscribe<E> {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            listeners: std::sync::Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn subscribe(
        self: &std::sync::Arc<Self>,
        listener: Box<dyn Fn(&E) + Send + Sync>,
    ) -> Unsubscribe<E> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, listener));
        Unsubscribe {
            id,
            registry: std::sync::Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(i, _)| *i != id);
    }

    /// Notify every listener, isolating one panicking listener from the
    /// rest (§5: "a listener that throws during notification must not
    /// prevent notification of the remaining listeners").
    pub fn notify(&self, event: &E)
    where
        E: std::panic::RefUnwindSafe,
    {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event))) {
                log::error!("sync listener panicked: {:?}", panic_message(&panic));
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unsubscribed_listener_stops_receiving_events() {
        let registry: Arc<ListenerRegistry<i32>> = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sub = registry.subscribe(Box::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        registry.notify(&1);
        sub.unsubscribe();
        registry.notify(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry: Arc<ListenerRegistry<i32>> = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        registry.subscribe(Box::new(|_| panic!("boom")));
        registry.subscribe(Box::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        registry.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
