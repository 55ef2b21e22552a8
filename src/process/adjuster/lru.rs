/*!
 * Cached Tier Ranking
 *
 * Walks the LRU list newest first and hands out fine-grained cached adj
 * values to processes the rules left unassigned. The previous-app ladder
 * is spread here too.
 */

use super::config::{ms, AdjusterConfig, Features, TieredCachedConfig};
use super::evaluator::{binds_above_client, modify_raw_adj};
use crate::core::limits::*;
use crate::core::types::{Adj, Pid, Timestamp};
use crate::process::core::types::ProcState;
use crate::process::table::ProcessTable;
use ahash::RandomState;
use std::cmp::Reverse;
use std::collections::HashMap;

/// States ranked on the cached (activity) ladder rather than the empty one
#[inline]
fn on_cached_ladder(state: ProcState) -> bool {
    matches!(
        state,
        ProcState::LastActivity
            | ProcState::CachedActivity
            | ProcState::CachedActivityClient
            | ProcState::CachedRecent
    )
}

/// Hands out previous-app adj values, one step per process
#[derive(Debug)]
struct PreviousLadder {
    next: Adj,
}

impl PreviousLadder {
    fn new() -> Self {
        Self {
            next: PREVIOUS_APP_ADJ,
        }
    }

    fn take(&mut self) -> Adj {
        let adj = self.next;
        self.next = (self.next + 1).min(PREVIOUS_APP_MAX_ADJ);
        adj
    }
}

/// Stepping bucket counter for one of the two non-tiered ladders
#[derive(Debug)]
struct Ladder {
    cur: Adj,
    next: Adj,
    step: i64,
    factor: i64,
    spacing: Adj,
}

impl Ladder {
    fn new(start: Adj, spacing: Adj, factor: i64) -> Self {
        Self {
            cur: start,
            next: start + spacing * 2,
            step: -1,
            factor: factor.max(1),
            spacing,
        }
    }

    /// Advance for a process that does not share the previous one's bucket
    fn advance(&mut self) -> bool {
        if self.cur == self.next {
            return false;
        }
        self.step += 1;
        if self.step >= self.factor {
            self.step = 0;
            self.cur = self.next;
            self.next = (self.next + self.spacing * 2).min(CACHED_APP_MAX_ADJ);
        }
        true
    }
}

#[inline]
fn ceil_div(n: i64, d: i64) -> i64 {
    (n + d - 1) / d
}

/// Write a tier-assigned adj, honoring an above-client binding
fn assign(table: &mut ProcessTable, pid: Pid, raw: Adj) {
    let above_client = table
        .get(pid)
        .is_some_and(|record| binds_above_client(table, record));
    if let Some(record) = table.get_mut(pid) {
        record.state.cur_raw_adj = raw;
        record.state.cur.adj = if above_client { modify_raw_adj(raw) } else { raw };
    }
}

/// Kill order for this pass: the LRU list with the members of each cached
/// bucket reordered so heavier processes sit at older positions
///
/// Slots are only permuted within one bucket and the table's own recency
/// order is left alone.
pub fn rerank_by_memory(table: &ProcessTable) -> Vec<Pid> {
    let mut order: Vec<Pid> = table.lru().to_vec();
    let mut buckets: HashMap<Adj, Vec<usize>, RandomState> = HashMap::default();
    for (slot, pid) in order.iter().enumerate() {
        let Some(record) = table.get(*pid) else {
            continue;
        };
        let cur = &record.state.cur;
        if record.is_alive() && cur.proc_state.is_cached() && cur.adj >= CACHED_APP_MIN_ADJ {
            buckets.entry(cur.adj).or_default().push(slot);
        }
    }

    for slots in buckets.into_values().filter(|slots| slots.len() > 1) {
        let mut members: Vec<Pid> = slots.iter().map(|slot| order[*slot]).collect();
        members.sort_by_key(|pid| Reverse(table.get(*pid).map_or(0, |r| r.signals.last_pss_kb)));
        for (slot, pid) in slots.into_iter().zip(members) {
            order[slot] = pid;
        }
    }
    order
}

/// Assign cached adj values along the LRU list
pub fn apply_lru_adjust(
    table: &mut ProcessTable,
    config: &AdjusterConfig,
    features: Features,
    now: Timestamp,
) {
    let tiered = config
        .cached
        .tiered
        .as_ref()
        .filter(|_| features.contains(Features::TIERED_CACHED_ADJ));
    match tiered {
        Some(tiered) => tiered_walk(table, tiered, now),
        None => ladder_walk(table, config),
    }
}

fn tiered_walk(table: &mut ProcessTable, tiered: &TieredCachedConfig, now: Timestamp) {
    let lru: Vec<Pid> = table.lru().to_vec();
    let mut previous = PreviousLadder::new();
    let mut ui_target = TIERED_UI_TARGET_START;
    let ui_max = TIERED_UI_TARGET_START + tiered.ui_tier_size;

    for pid in lru.into_iter().rev() {
        let Some(record) = table.get(pid) else {
            continue;
        };
        let cur_adj = record.state.cur.adj;
        if (PREVIOUS_APP_ADJ..=PREVIOUS_APP_MAX_ADJ).contains(&cur_adj) {
            let adj = previous.take();
            if let Some(record) = table.get_mut(pid) {
                record.state.cur.adj = adj;
            }
            continue;
        }
        let shown_ui = record.signals.has_shown_ui;
        if !record.is_alive()
            || !(cur_adj >= UNKNOWN_ADJ || (shown_ui && cur_adj >= CACHED_APP_MIN_ADJ))
        {
            continue;
        }

        let offset = if record.signals.freeze_exempt {
            0
        } else if shown_ui && ui_target < ui_max {
            ui_target += 1;
            ui_target - 1
        } else if record.state.set.adj >= CACHED_APP_MIN_ADJ
            && record.state.last_state_time + ms(tiered.decay) < now
        {
            TIERED_DECAYED_OFFSET + tiered.ui_tier_size
        } else {
            TIERED_UI_TARGET_START + tiered.ui_tier_size
        };
        assign(table, pid, CACHED_APP_MIN_ADJ + offset);
    }
}

fn ladder_walk(table: &mut ProcessTable, config: &AdjusterConfig) {
    let lru: Vec<Pid> = table.lru().to_vec();
    let levels = config.cached.importance_levels;
    let slots = i64::from(config.cached_slots().max(1));

    let (mut hidden, mut empty) = (0i64, 0i64);
    for record in lru.iter().filter_map(|pid| table.get(*pid)) {
        if !record.is_alive() || record.state.cur.adj < UNKNOWN_ADJ {
            continue;
        }
        if on_cached_ladder(record.state.cur.proc_state) {
            hidden += 1;
        } else {
            empty += 1;
        }
    }
    // Old empty processes sink to the bottom once they outnumber the cached quota
    let empty = empty.min(config.quotas.cached_only() as i64);

    let mut cached = Ladder::new(CACHED_APP_MIN_ADJ, levels, ceil_div(hidden, slots));
    let mut cached_imp: Adj = 0;
    let mut empties = Ladder::new(CACHED_APP_MIN_ADJ + levels, levels, ceil_div(empty, slots));
    let mut previous = PreviousLadder::new();
    let (mut last_group, mut last_group_uid, mut last_importance) = (0u32, 0u32, 0u32);

    for pid in lru.into_iter().rev() {
        let Some(record) = table.get(pid) else {
            continue;
        };
        let cur_adj = record.state.cur.adj;
        if (PREVIOUS_APP_ADJ..=PREVIOUS_APP_MAX_ADJ).contains(&cur_adj) {
            let adj = previous.take();
            if let Some(record) = table.get_mut(pid) {
                record.state.cur.adj = adj;
            }
            continue;
        }
        if !record.is_alive() || cur_adj < UNKNOWN_ADJ {
            continue;
        }

        if on_cached_ladder(record.state.cur.proc_state) {
            let group = record.signals.connection_group;
            let mut in_group = false;
            if group != 0 {
                let importance = record.signals.connection_importance;
                if last_group_uid == record.uid && last_group == group {
                    // Same group as the last process: only importance moves it
                    if importance > last_importance {
                        last_importance = importance;
                        if cached.cur < cached.next && cached.cur < CACHED_APP_MAX_ADJ {
                            cached_imp += 1;
                        }
                    }
                    in_group = true;
                } else {
                    last_group_uid = record.uid;
                    last_group = group;
                    last_importance = importance;
                }
            }
            if !in_group && cached.advance() {
                cached_imp = 0;
            }
            assign(table, pid, cached.cur + cached_imp);
        } else {
            empties.advance();
            assign(table, pid, empties.cur);
        }
    }
}
