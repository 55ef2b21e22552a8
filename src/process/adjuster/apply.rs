/*!
 * Apply
 * Commits a computed score and reports the side effects it implies
 */

use super::config::FreezerConfig;
use super::freeze::{update_freeze_state, FreezeAction};
use super::outbound::{Effect, ScoreChange};
use crate::core::types::Timestamp;
use crate::process::core::types::{ProcState, ThreadGroup};
use crate::process::record::ProcessRecord;

/// What committing one process produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub score_change: Option<ScoreChange>,
    pub sched_change: Option<ThreadGroup>,
    pub freeze: Option<FreezeAction>,
    pub state_changed: bool,
}

impl Applied {
    /// Per-process effects; score changes are batched by the caller
    pub fn effects(&self, pid: u32) -> impl Iterator<Item = Effect> + '_ {
        let sched = self
            .sched_change
            .map(|group| Effect::SchedulingClass { pid, group });
        let freeze = self.freeze.map(|action| match action {
            FreezeAction::Freeze => Effect::Freeze { pid },
            FreezeAction::Unfreeze(reason) => Effect::Unfreeze { pid, reason },
        });
        sched.into_iter().chain(freeze)
    }
}

/// Commit `cur` into `set` and diff against the previous commit
pub fn apply_process(
    record: &mut ProcessRecord,
    freezer: &FreezerConfig,
    cpu_time: bool,
    now: Timestamp,
) -> Applied {
    let mut applied = Applied::default();
    let old = record.state.set;
    let new = record.state.cur;

    record.state.set_raw_adj = record.state.cur_raw_adj;

    if old.adj != new.adj || old.proc_state != new.proc_state || old.capability != new.capability {
        applied.score_change = Some(ScoreChange {
            pid: record.pid,
            uid: record.uid,
            old,
            new,
        });
    }

    let old_group = old.sched_group.thread_group();
    let new_group = new.sched_group.thread_group();
    if old_group != new_group {
        applied.sched_change = Some(new_group);
    }

    if old.proc_state != new.proc_state {
        applied.state_changed = true;
        record.state.last_state_time = now;
        if old.proc_state == ProcState::Top {
            record.times.last_top_time = now;
        }
        if new.proc_state == ProcState::CachedEmpty {
            record.times.last_empty_time = now;
        }
    }
    if !new.proc_state.is_cached() {
        record.state.not_cached_since_idle = true;
    }

    record.state.set = new;
    record.state.reported_state = new.proc_state;
    record.state.contains_cycle = false;

    applied.freeze = update_freeze_state(record, freezer, cpu_time);
    applied
}
