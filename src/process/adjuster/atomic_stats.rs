/*!
 * Lock-Free Adjuster Statistics
 * Atomic counters readable while a pass holds the adjuster
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjusterStats {
    pub full_passes: u64,
    pub partial_passes: u64,
    pub coalesced_requests: u64,
    pub follow_ups_fired: u64,
    pub cycle_rounds: u64,
    pub unconverged_passes: u64,
    pub kills: u64,
    pub freezes: u64,
    pub unfreezes: u64,
}

/// Atomic adjuster statistics
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - Relaxed ordering; counters are independent of each other
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct AtomicAdjusterStats {
    full_passes: AtomicU64,
    partial_passes: AtomicU64,
    coalesced_requests: AtomicU64,
    follow_ups_fired: AtomicU64,
    cycle_rounds: AtomicU64,
    unconverged_passes: AtomicU64,
    kills: AtomicU64,
    freezes: AtomicU64,
    unfreezes: AtomicU64,
}

impl AtomicAdjusterStats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn inc_pass(&self, full: bool) {
        if full {
            self.full_passes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.partial_passes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Coalesced requests are counted by the coalescer; this mirrors its total
    #[inline]
    pub fn set_coalesced(&self, total: u64) {
        self.coalesced_requests.store(total, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn add_follow_ups(&self, n: u64) {
        self.follow_ups_fired.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn add_cycle_rounds(&self, rounds: u64) {
        self.cycle_rounds.fetch_add(rounds, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_unconverged(&self) {
        self.unconverged_passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn add_kills(&self, n: u64) {
        self.kills.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_freezes(&self) {
        self.freezes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_unfreezes(&self) {
        self.unfreezes.fetch_add(1, Ordering::Relaxed);
    }

    /// Each value is exact; values may be mutually inconsistent mid-pass
    #[inline]
    pub fn snapshot(&self) -> AdjusterStats {
        AdjusterStats {
            full_passes: self.full_passes.load(Ordering::Relaxed),
            partial_passes: self.partial_passes.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            follow_ups_fired: self.follow_ups_fired.load(Ordering::Relaxed),
            cycle_rounds: self.cycle_rounds.load(Ordering::Relaxed),
            unconverged_passes: self.unconverged_passes.load(Ordering::Relaxed),
            kills: self.kills.load(Ordering::Relaxed),
            freezes: self.freezes.load(Ordering::Relaxed),
            unfreezes: self.unfreezes.load(Ordering::Relaxed),
        }
    }
}
