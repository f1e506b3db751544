//! Usage statistics for the connection pool
//!
//! In-memory counters describing pool usage, consumed by the health monitor
//! and exposed for diagnostics. All counters are monotonically non-decreasing
//! except through an explicit, administrator-triggered [`PoolStatistics::reset`].
//!
//! Updates are per-call and lock-free; no global ordering across callers is
//! required, only per-counter monotonicity.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters owned by the connection pool
pub struct PoolStatistics {
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    error_count: AtomicU64,
    last_error_at: RwLock<Option<DateTime<Utc>>>,
    started_at: DateTime<Utc>,
}

impl PoolStatistics {
    pub fn new() -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_error_at: RwLock::new(None),
            started_at: Utc::now(),
        }
    }

    /// Record a completed call (successful or failed)
    ///
    /// Every completed `query`/`transaction`/probe increments `total_queries`;
    /// slow calls additionally increment `slow_queries`; failures increment
    /// `error_count` and stamp `last_error_at`.
    pub fn record_query(&self, slow: bool, failed: bool) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            *self.last_error_at.write() = Some(Utc::now());
        }
    }

    /// True if an error was recorded within the trailing window
    pub fn last_error_within(&self, window: Duration) -> bool {
        match *self.last_error_at.read() {
            Some(at) => {
                let elapsed = Utc::now().signed_duration_since(at);
                elapsed.num_milliseconds() >= 0
                    && (elapsed.num_milliseconds() as u128) < window.as_millis()
            }
            None => false,
        }
    }

    /// Administrator-triggered reset
    ///
    /// The only permitted non-monotonic transition. `started_at` is preserved
    /// so uptime keeps its meaning.
    pub fn reset(&self) {
        self.total_queries.store(0, Ordering::Relaxed);
        self.slow_queries.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        *self.last_error_at.write() = None;
    }

    /// Point-in-time snapshot, merged with live pool occupancy numbers
    pub fn snapshot(&self, total: usize, idle: usize, waiting: usize) -> PoolStatsSnapshot {
        let now = Utc::now();
        let uptime_ms = now
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        PoolStatsSnapshot {
            total_connections: total,
            idle_connections: idle,
            waiting_clients: waiting,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error_at: *self.last_error_at.read(),
            started_at: self.started_at,
            uptime_ms,
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    pub fn slow_queries(&self) -> u64 {
        self.slow_queries.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl Default for PoolStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot returned by `get_pool_stats`
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsSnapshot {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub waiting_clients: usize,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub error_count: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = PoolStatistics::new();
        let snap = stats.snapshot(0, 0, 0);
        assert_eq!(snap.total_queries, 0);
        assert_eq!(snap.slow_queries, 0);
        assert_eq!(snap.error_count, 0);
        assert!(snap.last_error_at.is_none());
    }

    #[test]
    fn test_record_slow_and_failed() {
        let stats = PoolStatistics::new();
        stats.record_query(false, false);
        stats.record_query(true, false);
        stats.record_query(false, true);

        assert_eq!(stats.total_queries(), 3);
        assert_eq!(stats.slow_queries(), 1);
        assert_eq!(stats.error_count(), 1);
        assert!(stats.last_error_within(Duration::from_secs(60)));
    }

    #[test]
    fn test_no_error_means_no_trailing_window_hit() {
        let stats = PoolStatistics::new();
        stats.record_query(false, false);
        assert!(!stats.last_error_within(Duration::from_secs(60)));
    }

    #[test]
    fn test_reset_clears_counters() {
        let stats = PoolStatistics::new();
        stats.record_query(true, true);
        stats.reset();

        assert_eq!(stats.total_queries(), 0);
        assert_eq!(stats.slow_queries(), 0);
        assert_eq!(stats.error_count(), 0);
        assert!(!stats.last_error_within(Duration::from_secs(60)));
    }

    // N concurrent recorded calls end with total_queries == N, no lost updates
    #[tokio::test]
    async fn test_concurrent_recording_is_lossless() {
        let stats = Arc::new(PoolStatistics::new());
        let mut handles = Vec::new();

        for i in 0..50 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for j in 0..20 {
                    stats.record_query(j % 5 == 0, i % 10 == 0 && j == 0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stats.total_queries(), 1000);
        assert_eq!(stats.slow_queries(), 200);
        assert_eq!(stats.error_count(), 5);
    }

    #[test]
    fn test_uptime_is_derived() {
        let stats = PoolStatistics::new();
        let snap = stats.snapshot(2, 1, 0);
        assert!(snap.uptime_ms < 5_000);
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.idle_connections, 1);
    }
}
