//! Engine tunables. A plain struct with a `Default` impl carrying the
//! reference codebase's device-sync constants translated to this domain;
//! constructible by the embedding application, never sourced from env/files.

use std::time::Duration;

/// Base delay for the engine's exponential backoff (`base * 2^attempts`,
/// capped at [`Config::backoff_cap`]), mirroring the reference's
/// `backoff_seconds` base of 5 seconds.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// The reference caps its backoff exponent at 8 (`5 * 2^8` = 1280s); this
/// crate caps the resulting delay directly instead of the exponent so the
/// cap is legible regardless of the base.
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(1280);

/// Poll interval used while idle and online, with no pending work — the
/// engine otherwise only wakes on a nudge. Mirrors
/// `DEVICE_SYNC_FOREGROUND_INTERVAL_SECS`.
const DEFAULT_FOREGROUND_POLL_INTERVAL: Duration = Duration::from_secs(45);

/// Random jitter window added to both the foreground poll interval and each
/// retry backoff, mirroring `DEVICE_SYNC_INTERVAL_JITTER_SECS`.
const DEFAULT_JITTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter: Duration,
    /// §4.4: "max attempts >= 3" before... actually the spec never drops a
    /// transient failure permanently; this bounds how many attempts the
    /// engine will make before treating persistent transient failure the
    /// same as `Permanent` (moved to the failed shelf) rather than retrying
    /// forever.
    pub max_transient_attempts: i32,
    /// Push-chunk size for the bulk pusher (§4.5).
    pub bulk_chunk_size: usize,
    /// Poll interval when `Running`, online, with no pending work.
    pub foreground_poll_interval: Duration,
    /// Bound on how long `dispose()` waits for an in-flight executor call.
    pub dispose_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            jitter: DEFAULT_JITTER,
            max_transient_attempts: 8,
            bulk_chunk_size: 10,
            foreground_poll_interval: DEFAULT_FOREGROUND_POLL_INTERVAL,
            dispose_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// `base * 2^attempts`, capped, then widened by up to `jitter` of random
    /// slack. Mirrors the reference's `backoff_seconds`, which also caps the
    /// exponent (there at 8) before adding jitter.
    pub fn backoff_for_attempt(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, 8) as u32;
        let scaled = self.backoff_base.saturating_mul(1u32 << exponent);
        let capped = scaled.min(self.backoff_cap);
        capped + jittered(self.jitter)
    }

    /// The foreground poll interval, widened by up to `jitter` of random
    /// slack, so many engines across many processes don't all wake in lockstep.
    pub fn poll_interval(&self) -> Duration {
        self.foreground_poll_interval + jittered(self.jitter)
    }
}

fn jittered(bound: Duration) -> Duration {
    if bound.is_zero() {
        return Duration::ZERO;
    }
    let millis = bound.as_millis().max(1) as u64;
    Duration::from_millis(rand::random::<u64>() % millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let cfg = Config::default();
        let small = cfg.backoff_for_attempt(0);
        let large = cfg.backoff_for_attempt(20);
        assert!(small >= cfg.backoff_base);
        assert!(small < cfg.backoff_base + cfg.jitter);
        assert!(large <= cfg.backoff_cap + cfg.jitter);
    }

    #[test]
    fn poll_interval_stays_within_jitter_band() {
        let cfg = Config::default();
        let interval = cfg.poll_interval();
        assert!(interval >= cfg.foreground_poll_interval);
        assert!(interval <= cfg.foreground_poll_interval + cfg.jitter);
    }
}
