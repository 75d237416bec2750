//! Dispatch statistics collection
//!
//! Provides atomic counters for real-time monitoring of the dispatch core.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Dispatch statistics - atomic counters for thread-safe access
pub struct DispatchStats {
    /// Total message sends dispatched
    pub sends: AtomicU64,
    /// Inline-cache hits (guard held on the resolved path)
    pub cache_hits: AtomicU64,
    /// Inline-cache misses (guard failed or site uninitialized)
    pub cache_misses: AtomicU64,
    /// Cache state transitions (install, extend)
    pub cache_transitions: AtomicU64,
    /// Collapses to the megamorphic state
    pub megamorphic_collapses: AtomicU64,
    /// Meta-object resolutions attempted (must stay at zero while
    /// reflection is deactivated)
    pub mop_resolutions: AtomicU64,
    /// Meta-object resolutions that produced a handler
    pub mop_overrides: AtomicU64,
    /// Assumption tokens invalidated by switch flips
    pub assumption_invalidations: AtomicU64,
    /// Start time
    start_time: Instant,
}

/// Snapshot of dispatch stats (for reporting)
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    /// Duration since profiling started (microseconds)
    pub duration_us: u64,
    /// Total message sends dispatched
    pub sends: u64,
    /// Inline-cache hits
    pub cache_hits: u64,
    /// Inline-cache misses
    pub cache_misses: u64,
    /// Cache state transitions
    pub cache_transitions: u64,
    /// Collapses to the megamorphic state
    pub megamorphic_collapses: u64,
    /// Meta-object resolutions attempted
    pub mop_resolutions: u64,
    /// Meta-object resolutions that produced a handler
    pub mop_overrides: u64,
    /// Assumption tokens invalidated
    pub assumption_invalidations: u64,
    /// Cache hit rate over all guarded lookups (0.0 when none)
    pub cache_hit_rate: f64,
}

impl DispatchStats {
    /// Create new stats counters
    pub fn new() -> Self {
        Self {
            sends: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_transitions: AtomicU64::new(0),
            megamorphic_collapses: AtomicU64::new(0),
            mop_resolutions: AtomicU64::new(0),
            mop_overrides: AtomicU64::new(0),
            assumption_invalidations: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a message send
    #[inline]
    pub fn record_send(&self) {
        self.sends.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inline-cache hit
    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inline-cache miss
    #[inline]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache state transition
    #[inline]
    pub fn record_cache_transition(&self) {
        self.cache_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a collapse to the megamorphic state
    #[inline]
    pub fn record_megamorphic_collapse(&self) {
        self.megamorphic_collapses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a meta-object resolution attempt
    #[inline]
    pub fn record_mop_resolution(&self) {
        self.mop_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a meta-object resolution that produced a handler
    #[inline]
    pub fn record_mop_override(&self) {
        self.mop_overrides.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an assumption invalidation
    #[inline]
    pub fn record_assumption_invalidation(&self) {
        self.assumption_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of meta-object resolutions attempted so far
    #[inline]
    pub fn mop_resolution_count(&self) -> u64 {
        self.mop_resolutions.load(Ordering::Relaxed)
    }

    /// Take a snapshot of current stats
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        let duration_us = self.start_time.elapsed().as_micros() as u64;

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let guarded = hits + misses;

        DispatchStatsSnapshot {
            duration_us,
            sends: self.sends.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_transitions: self.cache_transitions.load(Ordering::Relaxed),
            megamorphic_collapses: self.megamorphic_collapses.load(Ordering::Relaxed),
            mop_resolutions: self.mop_resolutions.load(Ordering::Relaxed),
            mop_overrides: self.mop_overrides.load(Ordering::Relaxed),
            assumption_invalidations: self.assumption_invalidations.load(Ordering::Relaxed),
            cache_hit_rate: if guarded > 0 {
                hits as f64 / guarded as f64
            } else {
                0.0
            },
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.sends.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.cache_transitions.store(0, Ordering::Relaxed);
        self.megamorphic_collapses.store(0, Ordering::Relaxed);
        self.mop_resolutions.store(0, Ordering::Relaxed);
        self.mop_overrides.store(0, Ordering::Relaxed);
        self.assumption_invalidations.store(0, Ordering::Relaxed);
    }
}

impl DispatchStatsSnapshot {
    /// Serialize the snapshot as a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}
