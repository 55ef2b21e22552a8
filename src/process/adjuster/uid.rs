/*!
 * Uid Aggregates
 * Per-principal roll-up of the best state and the union of capabilities
 */

use crate::core::limits::UNKNOWN_ADJ;
use crate::core::types::{Adj, Uid};
use crate::process::core::types::{Capability, ProcState};
use crate::process::table::ProcessTable;
use ahash::RandomState;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

bitflags! {
    /// What changed in a uid aggregate during a pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct UidChange: u32 {
        const GONE = 1 << 0;
        const ACTIVE = 1 << 1;
        const IDLE = 1 << 2;
        const CACHED = 1 << 3;
        const UNCACHED = 1 << 4;
        const CAPABILITY = 1 << 5;
        const PROCSTATE = 1 << 6;
        const PROC_ADJ = 1 << 7;
    }
}

/// Aggregate of one uid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidRecord {
    pub uid: Uid,
    pub proc_state: ProcState,
    pub capability: Capability,
    pub min_adj: Adj,
    pub idle: bool,
    set_proc_state: ProcState,
    set_capability: Capability,
    set_min_adj: Adj,
    set_idle: bool,
    set_cached: bool,
}

impl UidRecord {
    fn new(uid: Uid) -> Self {
        Self {
            uid,
            proc_state: ProcState::Nonexistent,
            capability: Capability::empty(),
            min_adj: UNKNOWN_ADJ,
            idle: true,
            set_proc_state: ProcState::Nonexistent,
            set_capability: Capability::empty(),
            set_min_adj: UNKNOWN_ADJ,
            set_idle: true,
            set_cached: true,
        }
    }

    fn reset(&mut self) {
        self.proc_state = ProcState::Nonexistent;
        self.capability = Capability::empty();
        self.min_adj = UNKNOWN_ADJ;
    }

    #[inline]
    pub fn is_cached(&self) -> bool {
        self.proc_state.is_uid_cached()
    }

    /// Diff against the last commit and make the current values the commit
    fn commit(&mut self) -> UidChange {
        self.idle = self.proc_state.is_background();
        let cached = self.is_cached();

        let mut change = UidChange::empty();
        if self.proc_state != self.set_proc_state {
            change |= UidChange::PROCSTATE;
        }
        if self.capability != self.set_capability {
            change |= UidChange::CAPABILITY;
        }
        if self.min_adj != self.set_min_adj {
            change |= UidChange::PROC_ADJ;
        }
        if cached != self.set_cached {
            change |= if cached { UidChange::CACHED } else { UidChange::UNCACHED };
        }
        if self.idle != self.set_idle {
            change |= if self.idle { UidChange::IDLE } else { UidChange::ACTIVE };
        }

        self.set_proc_state = self.proc_state;
        self.set_capability = self.capability;
        self.set_min_adj = self.min_adj;
        self.set_idle = self.idle;
        self.set_cached = cached;
        change
    }
}

/// A reported aggregate transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidChangeRecord {
    pub uid: Uid,
    pub change: UidChange,
    pub proc_state: ProcState,
    pub capability: Capability,
}

/// All uid aggregates, rebuilt for the uids a pass touched
#[derive(Debug, Default)]
pub struct UidTracker {
    uids: HashMap<Uid, UidRecord, RandomState>,
}

impl UidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: Uid) -> Option<&UidRecord> {
        self.uids.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Recompute the aggregates of `touched` uids (all uids when `None`)
    pub fn update(&mut self, table: &ProcessTable, touched: Option<&HashSet<Uid, RandomState>>) -> Vec<UidChangeRecord> {
        let wanted = |uid: Uid| touched.map_or(true, |set| set.contains(&uid));

        for record in self.uids.values_mut() {
            if wanted(record.uid) {
                record.reset();
            }
        }

        let mut present: HashSet<Uid, RandomState> = HashSet::default();
        for process in table.iter().filter(|p| p.is_alive() && wanted(p.uid)) {
            present.insert(process.uid);
            let agg = self
                .uids
                .entry(process.uid)
                .or_insert_with(|| UidRecord::new(process.uid));
            let cur = &process.state.cur;
            agg.proc_state = agg.proc_state.min(cur.proc_state);
            agg.capability |= cur.capability;
            agg.min_adj = agg.min_adj.min(cur.adj);
        }

        let mut changes = Vec::new();
        let gone: Vec<Uid> = self
            .uids
            .keys()
            .copied()
            .filter(|uid| wanted(*uid) && !present.contains(uid))
            .collect();
        for uid in gone {
            self.uids.remove(&uid);
            changes.push(UidChangeRecord {
                uid,
                change: UidChange::GONE,
                proc_state: ProcState::Nonexistent,
                capability: Capability::empty(),
            });
        }

        for uid in present {
            if let Some(agg) = self.uids.get_mut(&uid) {
                let change = agg.commit();
                if !change.is_empty() {
                    changes.push(UidChangeRecord {
                        uid,
                        change,
                        proc_state: agg.proc_state,
                        capability: agg.capability,
                    });
                }
            }
        }
        changes.sort_by_key(|c| c.uid);
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::core::types::{SchedGroup, Score};
    use crate::process::record::ProcessRecord;
    use pretty_assertions::assert_eq;

    fn add(table: &mut ProcessTable, pid: u32, uid: Uid, adj: Adj, state: ProcState, cap: Capability) {
        let mut record = ProcessRecord::new(pid, uid, "app");
        record.state.cur = Score::new(adj, state, SchedGroup::Default).with_capability(cap);
        table.add(record).unwrap();
    }

    #[test]
    fn test_best_state_and_union_of_capabilities() {
        let mut table = ProcessTable::new();
        add(&mut table, 1, 100, 900, ProcState::CachedEmpty, Capability::empty());
        add(&mut table, 2, 100, 500, ProcState::Service, Capability::POWER_RESTRICTED_NETWORK);
        add(&mut table, 3, 100, 200, ProcState::ImportantBackground, Capability::USER_RESTRICTED_NETWORK);

        let mut tracker = UidTracker::new();
        let changes = tracker.update(&table, None);
        let agg = tracker.get(100).unwrap();
        assert_eq!(agg.proc_state, ProcState::ImportantBackground);
        assert_eq!(agg.capability, Capability::NETWORK);
        assert_eq!(agg.min_adj, 200);
        assert!(!agg.idle);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].change.contains(UidChange::UNCACHED | UidChange::ACTIVE));
    }

    #[test]
    fn test_second_update_reports_nothing() {
        let mut table = ProcessTable::new();
        add(&mut table, 1, 100, 500, ProcState::Service, Capability::empty());
        let mut tracker = UidTracker::new();
        tracker.update(&table, None);
        assert!(tracker.update(&table, None).is_empty());
    }

    #[test]
    fn test_last_process_gone() {
        let mut table = ProcessTable::new();
        add(&mut table, 1, 100, 500, ProcState::Service, Capability::empty());
        let mut tracker = UidTracker::new();
        tracker.update(&table, None);
        table.get_mut(1).unwrap().killed = true;
        let changes = tracker.update(&table, None);
        assert_eq!(changes[0].change, UidChange::GONE);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_untouched_uid_left_alone() {
        let mut table = ProcessTable::new();
        add(&mut table, 1, 100, 500, ProcState::Service, Capability::empty());
        add(&mut table, 2, 200, 900, ProcState::CachedEmpty, Capability::empty());
        let mut tracker = UidTracker::new();
        tracker.update(&table, None);

        table.get_mut(2).unwrap().state.cur.proc_state = ProcState::Service;
        let touched: HashSet<Uid, RandomState> = [100].into_iter().collect();
        assert!(tracker.update(&table, Some(&touched)).is_empty());
        assert_eq!(tracker.get(200).unwrap().proc_state, ProcState::CachedEmpty);
    }
}
