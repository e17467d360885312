//! Counters the engine maintains across every `Check` call (`spec.md`
//! §4.6). Eventually consistent per `spec.md` §5: `total == allowed +
//! blocked` holds once observed after quiescence, not necessarily mid-flight.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of [`Metrics`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub total_violations: u64,
    pub backend_errors: u64,
}

impl MetricsSnapshot {
    /// `blocked / total`, `0.0` when there have been no requests yet.
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        }
    }
}

/// Atomics, not a mutex: the hot path (`Check`) only ever increments, never
/// needs to read-modify-write across fields together.
#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    total_violations: AtomicU64,
    backend_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.allowed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocked(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.blocked_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_violation(&self) {
        self.total_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            total_violations: self.total_violations.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.allowed_requests.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
        self.total_violations.store(0, Ordering::Relaxed);
        self.backend_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_equals_allowed_plus_blocked_after_quiescence() {
        let metrics = Metrics::new();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_blocked();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, snap.allowed_requests + snap.blocked_requests);
        assert_eq!(snap.total_requests, 3);
    }

    #[test]
    fn reset_zeros_everything() {
        let metrics = Metrics::new();
        metrics.record_allowed();
        metrics.record_backend_error();
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap, MetricsSnapshot::default());
    }

    #[test]
    fn block_rate_is_zero_with_no_requests() {
        assert_eq!(MetricsSnapshot::default().block_rate(), 0.0);
    }
}
