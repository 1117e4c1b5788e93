use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, updated from every stage
#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    scheduled: AtomicU64,
    applied: AtomicU64,
    air: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
    unavailable: AtomicU64,
    store_hits: AtomicU64,
    released: AtomicU64,
}

/// Point-in-time copy of the pipeline counters
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct PipelineStatsSnapshot {
    /// Generations started (requests, rebuilds, retries)
    pub scheduled: u64,
    /// Shapes installed on a body
    pub applied: u64,
    /// Generations that ended as air
    pub air: u64,
    /// Messages dropped because their version was superseded
    pub stale: u64,
    /// Geometry or physics failures
    pub failed: u64,
    /// Captures the world could not serve
    pub unavailable: u64,
    /// Shapes rebuilt from the persistent store instead of meshing
    pub store_hits: u64,
    /// Slots freed after cleanup
    pub released: u64,
}

impl PipelineStats {
    pub fn scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn air(&self) {
        self.air.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_hit(&self) {
        self.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            air: self.air.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}
