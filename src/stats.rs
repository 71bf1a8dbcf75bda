//! Per-method timing statistics.
//!
//! The master accumulates one [`MethodStats`] record per `kernel:method`
//! pair across all epochs. Averages derived from them feed the work
//! stealing policy, so every field is monotonically nondecreasing.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Rolling counters for one kernel method.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodStats {
    /// Number of `run` invocations.
    pub calls: u64,
    /// Total seconds spent executing shards.
    pub shard_time: f64,
    /// Number of completed shard executions.
    pub shard_calls: u64,
    /// Total wall-clock seconds across epochs, barrier included.
    pub total_time: f64,
}

impl MethodStats {
    /// Mean seconds per completed shard, 0 before the first completion.
    pub fn avg_completion_time(&self) -> f64 {
        if self.shard_calls == 0 {
            0.0
        } else {
            self.shard_time / self.shard_calls as f64
        }
    }
}

/// Statistics for every method the master has run, keyed `kernel:method`.
#[derive(Debug, Default)]
pub struct MethodStatsMap {
    entries: BTreeMap<String, MethodStats>,
}

impl MethodStatsMap {
    pub fn entry(&mut self, kernel: &str, method: &str) -> &mut MethodStats {
        self.entries.entry(key(kernel, method)).or_default()
    }

    /// Copy of the stats for a method; zeroed if it never ran.
    pub fn get(&self, kernel: &str, method: &str) -> MethodStats {
        self.entries
            .get(&key(kernel, method))
            .copied()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MethodStats)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Multi-line report for logging at shutdown.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (name, stats) in &self.entries {
            let _ = writeln!(
                out,
                "  {name}: calls={} shard_calls={} shard_time={:.3}s avg={:.3}s total={:.3}s",
                stats.calls,
                stats.shard_calls,
                stats.shard_time,
                stats.avg_completion_time(),
                stats.total_time,
            );
        }
        out
    }
}

fn key(kernel: &str, method: &str) -> String {
    format!("{kernel}:{method}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_completion_time_guards_zero_calls() {
        let stats = MethodStats::default();
        assert_eq!(stats.avg_completion_time(), 0.0);
    }

    #[test]
    fn entry_accumulates_monotonically() {
        let mut map = MethodStatsMap::default();
        {
            let stats = map.entry("Crawl", "run_step");
            stats.calls += 1;
            stats.shard_calls += 4;
            stats.shard_time += 2.0;
        }
        {
            let stats = map.entry("Crawl", "run_step");
            stats.shard_calls += 4;
            stats.shard_time += 2.0;
        }
        let stats = map.get("Crawl", "run_step");
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.shard_calls, 8);
        assert!((stats.avg_completion_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn report_lists_each_method_once() {
        let mut map = MethodStatsMap::default();
        map.entry("A", "x").calls = 2;
        map.entry("B", "y").calls = 1;
        let report = map.report();
        assert!(report.contains("A:x"));
        assert!(report.contains("B:y"));
    }
}
