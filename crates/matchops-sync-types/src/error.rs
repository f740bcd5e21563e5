use thiserror::Error;

/// How the engine should react to a failed executor call, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Network, 5xx, timeouts: retry with bounded exponential backoff.
    Retryable,
    /// 4xx (except auth), validation rejects: drop and record as failed.
    Permanent,
    /// Authorization failure: pause the engine until the caller re-authenticates.
    ReauthRequired,
}

/// The full error taxonomy from §7.
///
/// Categories 1-4 (`Validation`, `Precondition`, `LocalStore`, `Queue`) are
/// surfaced directly to the caller of the write-through wrapper. Categories
/// 5-7 (`TransientRemote`, `PermanentRemote`, `AuthLost`) never escape the
/// background engine; they only ever show up through `retry_class` as the
/// engine's own status counters.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input at a system boundary (e.g. an invalid userId).
    #[error("validation error: {0}")]
    Validation(String),

    /// An invariant was violated at call time (e.g. remote not set for bulk push).
    #[error("precondition error: {0}")]
    Precondition(String),

    /// The local store failed; the queue was never touched.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The durable queue failed to persist an enqueue; the local write still succeeded.
    #[error("queue error: {0}")]
    Queue(String),

    /// Network, timeout, or 5xx-class remote failure.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// 4xx-class (non-auth) remote rejection.
    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    /// Remote authorization was lost or rejected.
    #[error("auth lost: {0}")]
    AuthLost(String),
}

impl SyncError {
    /// Classify this error for the engine's retry policy (§7). Only
    /// meaningful for the three remote-facing variants; local/validation
    /// errors never reach the engine's retry loop in the first place, but a
    /// total mapping keeps callers from having to special-case `None`.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            SyncError::TransientRemote(_) => RetryClass::Retryable,
            SyncError::PermanentRemote(_) => RetryClass::Permanent,
            SyncError::AuthLost(_) => RetryClass::ReauthRequired,
            // Local-facing categories have no retry semantics of their own;
            // treat them as permanent so a caller that blindly retries an
            // executor error doesn't spin on a validation bug.
            SyncError::Validation(_)
            | SyncError::Precondition(_)
            | SyncError::LocalStore(_)
            | SyncError::Queue(_) => RetryClass::Permanent,
        }
    }

    pub fn is_queue_error(&self) -> bool {
        matches!(self, SyncError::Queue(_))
    }
}

/// Classify a remote HTTP-shaped status code into the §7 taxonomy's retry
/// policy. Useful for a `RemoteStore` implementation that talks HTTP, but
/// this crate makes no assumption that R is reached over HTTP.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_http_status_matches_taxonomy() {
        assert_eq!(classify_http_status(500), RetryClass::Retryable);
        assert_eq!(classify_http_status(429), RetryClass::Retryable);
        assert_eq!(classify_http_status(401), RetryClass::ReauthRequired);
        assert_eq!(classify_http_status(403), RetryClass::ReauthRequired);
        assert_eq!(classify_http_status(400), RetryClass::Permanent);
        assert_eq!(classify_http_status(404), RetryClass::Permanent);
    }

    #[test]
    fn retry_class_maps_remote_variants() {
        assert_eq!(
            SyncError::TransientRemote("x".into()).retry_class(),
            RetryClass::Retryable
        );
        assert_eq!(
            SyncError::PermanentRemote("x".into()).retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(
            SyncError::AuthLost("x".into()).retry_class(),
            RetryClass::ReauthRequired
        );
    }

    #[test]
    fn queue_error_is_identifiable() {
        assert!(SyncError::Queue("disk full".into()).is_queue_error());
        assert!(!SyncError::LocalStore("x".into()).is_queue_error());
    }
}
