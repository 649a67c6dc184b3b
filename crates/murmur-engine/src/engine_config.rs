//! Dispatch tuning knobs.

use std::time::Duration;

pub const DEFAULT_MAX_LOCK_ATTEMPTS: u32 = 10;
pub const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DispatchConfig` used across Murmur components.
pub struct DispatchConfig {
    /// Total `try_lock` attempts before the event is skipped.
    pub max_lock_attempts: u32,
    /// Spacing between lock attempts.
    pub lock_retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_lock_attempts: DEFAULT_MAX_LOCK_ATTEMPTS,
            lock_retry_delay: Duration::from_millis(DEFAULT_LOCK_RETRY_DELAY_MS),
        }
    }
}
