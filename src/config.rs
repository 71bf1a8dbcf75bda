//! Master configuration.

use std::time::Duration;

/// Configuration for a [`crate::Master`] instance.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Number of worker slots the master waits for at startup.
    pub num_workers: usize,

    /// Whether pending tasks may migrate from loaded workers to idle ones.
    pub work_stealing: bool,

    /// Backoff between mailbox polls when no message is pending.
    pub sleep_time: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            work_stealing: true,
            sleep_time: Duration::from_millis(10),
        }
    }
}

impl MasterConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let num_workers: usize = std::env::var("PICCOLO_NUM_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.num_workers);

        let work_stealing: bool = std::env::var("PICCOLO_WORK_STEALING")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.work_stealing);

        let sleep_time = std::env::var("PICCOLO_SLEEP_TIME_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.sleep_time);

        Self {
            num_workers,
            work_stealing,
            sleep_time,
        }
    }
}
