//! Request statistics.
//!
//! Counts what the portal was asked to do:
//! - Submissions accepted into the action slot
//! - Submissions rejected as busy
//! - Submissions rejected as invalid
//! - Status polls
//! - Server uptime

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use deskhog_core::SubmitStatus;
use serde::{Deserialize, Serialize};

/// Body of `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalStatistics {
    pub accepted: u64,
    pub busy: u64,
    pub rejected: u64,
    pub status_polls: u64,
    /// Seconds since start.
    pub uptime: u64,
}

/// Collects request statistics.
pub struct StatisticsCollector {
    start_time: Instant,
    accepted: AtomicU64,
    busy: AtomicU64,
    rejected: AtomicU64,
    status_polls: AtomicU64,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accepted: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            status_polls: AtomicU64::new(0),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused submission under its reply status.
    pub fn record_rejected(&self, status: SubmitStatus) {
        let counter = match status {
            SubmitStatus::Busy => &self.busy,
            SubmitStatus::Error => &self.rejected,
            SubmitStatus::Queued => &self.accepted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_poll(&self) {
        self.status_polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self) -> PortalStatistics {
        PortalStatistics {
            accepted: self.accepted.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            status_polls: self.status_polls.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_counters() {
        let stats = StatisticsCollector::new();

        stats.record_accepted();
        stats.record_rejected(SubmitStatus::Busy);
        stats.record_rejected(SubmitStatus::Busy);
        stats.record_rejected(SubmitStatus::Error);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.busy, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.status_polls, 0);
    }

    #[test]
    fn test_status_polls() {
        let stats = StatisticsCollector::new();

        stats.record_status_poll();
        stats.record_status_poll();

        assert_eq!(stats.snapshot().status_polls, 2);
    }
}
