//! Runtime-configurable tuning parameters for lockstep.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `LOCKSTEP_`) or by constructing a custom `LockstepConfig`.

use std::time::Duration;

/// Timeouts for the blocking waits inside collective operations.
///
/// A crashed peer must not hang the remaining ranks forever; every wait in
/// the engine is bounded by one of these.
#[derive(Debug, Clone)]
pub struct LockstepConfig {
    /// Timeout for the entry rendezvous (waiting for every rank to arrive
    /// with its contribution).
    pub rendezvous_timeout: Duration,

    /// Timeout for round completion: the exit rendezvous of the generic
    /// collective and the readiness-signal waits of scatter-reduce and
    /// all-gather.
    pub round_timeout: Duration,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            rendezvous_timeout: Duration::from_secs(30),
            round_timeout: Duration::from_secs(30),
        }
    }
}

impl LockstepConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `LOCKSTEP_RENDEZVOUS_TIMEOUT_MS`
    /// - `LOCKSTEP_ROUND_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("LOCKSTEP_RENDEZVOUS_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.rendezvous_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("LOCKSTEP_ROUND_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.round_timeout = Duration::from_millis(ms);
            }
        }

        cfg
    }
}
