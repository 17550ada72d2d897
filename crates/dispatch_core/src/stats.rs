//! Request counters for the matching engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated with relaxed atomics from any thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    requests: AtomicU64,
    invalid: AtomicU64,
    cache_hits: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
    no_drivers: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub invalid: u64,
    pub cache_hits: u64,
    pub computations: u64,
    pub coalesced: u64,
    pub no_drivers: u64,
}

impl EngineStats {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_no_drivers(&self) {
        self.no_drivers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            no_drivers: self.no_drivers.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Share of requests answered without running the pipeline.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.cache_hits + self.coalesced) as f64 / self.requests as f64
    }
}
