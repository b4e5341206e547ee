//! Runtime tuning for the session and its supervision.

use crate::FilterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the interception core.
///
/// The wake/device delays are published for the outer glue that observes
/// those OS notifications; it passes them into `schedule_restart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Bound on the Attaching state before the attempt counts as failed.
    pub attach_timeout_ms: u64,
    /// Consecutive failed attach attempts before giving up.
    pub max_restart_attempts: u32,
    /// First supervised-restart delay; doubles per consecutive failure.
    pub restart_backoff_base_ms: u64,
    /// Restart delay after the system wakes from sleep.
    pub wake_restart_delay_ms: u64,
    /// Restart delay after a display or input device change.
    pub device_restart_delay_ms: u64,
    /// Restart delay after the tap could not be created at all.
    pub tap_retry_delay_ms: u64,
    /// Shrink the wake delay for quicker manual testing.
    pub fast_restart: bool,
    /// Trigger gesture configuration.
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: 5_000,
            max_restart_attempts: 3,
            restart_backoff_base_ms: 2_000,
            wake_restart_delay_ms: 10_000,
            device_restart_delay_ms: 2_000,
            tap_retry_delay_ms: 5_000,
            fast_restart: false,
            filter: FilterConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// Effective wake-restart delay, honoring `fast_restart`.
    pub fn wake_restart_delay(&self) -> Duration {
        if self.fast_restart {
            Duration::from_millis(2_000)
        } else {
            Duration::from_millis(self.wake_restart_delay_ms)
        }
    }

    pub fn device_restart_delay(&self) -> Duration {
        Duration::from_millis(self.device_restart_delay_ms)
    }

    pub fn tap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tap_retry_delay_ms)
    }

    /// Backoff delay for the given consecutive-failure count (1-based).
    /// Non-decreasing: base * 2^(n-1).
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 1u64 << consecutive_failures.saturating_sub(1).min(6);
        Duration::from_millis(self.restart_backoff_base_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_non_decreasing() {
        let config = CoreConfig::default();
        let mut prev = Duration::ZERO;
        for n in 1..=8 {
            let d = config.backoff_delay(n);
            assert!(d >= prev, "backoff shrank at attempt {n}");
            prev = d;
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let config = CoreConfig {
            restart_backoff_base_ms: 2_000,
            ..CoreConfig::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(8_000));
    }

    #[test]
    fn test_fast_restart_shrinks_wake_delay() {
        let mut config = CoreConfig::default();
        assert_eq!(config.wake_restart_delay(), Duration::from_millis(10_000));
        config.fast_restart = true;
        assert_eq!(config.wake_restart_delay(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attach_timeout_ms, config.attach_timeout_ms);
        assert_eq!(back.filter, config.filter);
    }
}
