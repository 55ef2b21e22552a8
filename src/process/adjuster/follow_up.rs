/*!
 * Follow-ups
 * Deferred re-evaluations for processes holding a temporary floor
 */

use crate::core::types::{Pid, Timestamp};
use ahash::RandomState;
use std::collections::HashMap;

/// Expiry times keyed by process, with a single derived wake time
#[derive(Debug, Default)]
pub struct FollowUps {
    due: HashMap<Pid, Timestamp, RandomState>,
    /// Wakes are spaced at least this far after the last firing
    not_before: Timestamp,
}

impl FollowUps {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.due.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }

    /// Register `pid` for re-evaluation at `at`; the earliest time wins
    ///
    /// Times already in the past are ignored.
    pub fn register(&mut self, pid: Pid, at: Timestamp, now: Timestamp) {
        if at <= now {
            return;
        }
        self.due
            .entry(pid)
            .and_modify(|cur| *cur = (*cur).min(at))
            .or_insert(at);
    }

    pub fn forget(&mut self, pid: Pid) {
        self.due.remove(&pid);
    }

    pub fn due_at(&self, pid: Pid) -> Option<Timestamp> {
        self.due.get(&pid).copied()
    }

    /// Next time the worker should wake
    pub fn next_wake(&self) -> Option<Timestamp> {
        self.due
            .values()
            .min()
            .map(|at| (*at).max(self.not_before))
    }

    /// Remove and return every entry due by `now`
    pub fn take_expired(&mut self, now: Timestamp, spacing: Timestamp) -> Vec<Pid> {
        let mut expired: Vec<Pid> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in &expired {
            self.due.remove(pid);
        }
        if !expired.is_empty() {
            self.not_before = now.saturating_add(spacing);
        }
        expired.sort_unstable();
        expired
    }
}
