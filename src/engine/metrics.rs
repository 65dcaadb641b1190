use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ShareMetrics {
    pub creates: AtomicU64,
    pub reconnects_granted: AtomicU64,
    pub reconnects_denied: AtomicU64,
    pub lease_breaks: AtomicU64,
    pub lease_invalidations: AtomicU64,
    pub notifications_dropped: AtomicU64,
    pub invariant_violations: AtomicU64,
}

impl ShareMetrics {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            creates: self.creates.load(Ordering::Relaxed),
            reconnects_granted: self.reconnects_granted.load(Ordering::Relaxed),
            reconnects_denied: self.reconnects_denied.load(Ordering::Relaxed),
            lease_breaks: self.lease_breaks.load(Ordering::Relaxed),
            lease_invalidations: self.lease_invalidations.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a share's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Fresh creates granted.
    pub creates: u64,
    pub reconnects_granted: u64,
    pub reconnects_denied: u64,
    pub lease_breaks: u64,
    pub lease_invalidations: u64,
    /// Break notifications that could not be queued to their connection.
    pub notifications_dropped: u64,
    pub invariant_violations: u64,
}
