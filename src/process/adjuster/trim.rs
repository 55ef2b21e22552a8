/*!
 * Trim Policy
 * Enforces the cached and empty quotas after the cached tier is ranked
 */

use super::config::{ms, AdjusterConfig, Features};
use crate::core::limits::INITIAL_FREE_SWAP;
use crate::core::types::{Pid, Timestamp};
use crate::process::core::types::{KillReason, ProcState};
use crate::process::table::ProcessTable;
use serde::{Deserialize, Serialize};

/// A process the policy decided to kill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillDecision {
    pub pid: Pid,
    pub reason: KillReason,
}

/// Counts observed during one trim walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimCounts {
    pub cached: usize,
    pub empty: usize,
    pub non_cached: usize,
}

/// Quota enforcement with the swap history the proactive kill needs
#[derive(Debug, Clone)]
pub struct TrimPolicy {
    started_at: Timestamp,
    last_free_swap: f64,
}

/// Tracks the connection group of the previous cached process
#[derive(Debug, Default)]
struct GroupRun {
    uid: u32,
    group: u32,
    extra: usize,
}

impl GroupRun {
    fn observe(&mut self, uid: u32, group: u32) {
        if group == 0 {
            self.uid = 0;
            self.group = 0;
        } else if self.uid == uid && self.group == group {
            // Group members after the first do not count against the quota
            self.extra += 1;
        } else {
            self.uid = uid;
            self.group = group;
        }
    }
}

impl TrimPolicy {
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            started_at,
            last_free_swap: INITIAL_FREE_SWAP,
        }
    }

    /// Quota kills are held off until the startup grace has passed
    #[inline]
    pub fn kills_allowed(&self, config: &AdjusterConfig, now: Timestamp) -> bool {
        now >= self.started_at.saturating_add(ms(config.timing.no_kill_grace))
    }

    /// Walk the LRU list newest first and mark every process over quota killed
    pub fn trim(
        &mut self,
        table: &mut ProcessTable,
        config: &AdjusterConfig,
        features: Features,
        now: Timestamp,
        free_swap: Option<f64>,
    ) -> (Vec<KillDecision>, TrimCounts) {
        let lru: Vec<Pid> = table.lru().to_vec();
        self.trim_in_order(table, &lru, config, features, now, free_swap)
    }

    /// Like [`TrimPolicy::trim`] over a pass-local order, oldest first
    pub fn trim_in_order(
        &mut self,
        table: &mut ProcessTable,
        order: &[Pid],
        config: &AdjusterConfig,
        features: Features,
        now: Timestamp,
        free_swap: Option<f64>,
    ) -> (Vec<KillDecision>, TrimCounts) {
        let allowed = self.kills_allowed(config, now);
        let (cached_limit, empty_limit, trim_empty) = if allowed {
            (
                config.quotas.cached_only(),
                config.quotas.max_empty,
                config.quotas.trim_empty(),
            )
        } else {
            (usize::MAX, usize::MAX, usize::MAX)
        };
        let old_time = now.saturating_sub(ms(config.timing.max_empty_time));

        let mut kills = Vec::new();
        let mut counts = TrimCounts::default();
        let mut groups = GroupRun::default();
        let mut candidate: Option<Pid> = None;

        for &pid in order.iter().rev() {
            let Some(record) = table.get(pid) else {
                continue;
            };
            if !record.is_alive() {
                continue;
            }

            let mut reason = None;
            match record.state.cur.proc_state {
                ProcState::CachedActivity | ProcState::CachedActivityClient => {
                    counts.cached += 1;
                    groups.observe(record.uid, record.signals.connection_group);
                    if counts.cached - groups.extra > cached_limit {
                        reason = Some(KillReason::TooManyCached);
                    } else {
                        candidate = Some(pid);
                    }
                }
                ProcState::CachedEmpty => {
                    if counts.empty > trim_empty && record.times.last_activity_time < old_time {
                        reason = Some(KillReason::EmptyTooLong);
                    } else {
                        counts.empty += 1;
                        if counts.empty > empty_limit {
                            reason = Some(KillReason::TooManyEmpty);
                        } else {
                            candidate = Some(pid);
                        }
                    }
                }
                _ => counts.non_cached += 1,
            }

            if reason.is_none() && !record.hosts_services() {
                if record.signals.isolated {
                    reason = Some(KillReason::IsolatedNotNeeded);
                } else if record.signals.sdk_sandbox
                    && !record.signals.active_instrumentation
                    && features.contains(Features::KILL_ISOLATED_WITHOUT_SERVICES)
                {
                    reason = Some(KillReason::SandboxNotNeeded);
                }
            }

            if let Some(reason) = reason {
                if candidate == Some(pid) {
                    candidate = None;
                }
                kills.push(KillDecision { pid, reason });
            }
        }

        if let Some(free_swap) = free_swap {
            // Free swap holding steady still counts as sustained pressure
            if features.contains(Features::PROACTIVE_KILLS)
                && allowed
                && free_swap < config.proactive.low_swap_threshold
                && free_swap <= self.last_free_swap
            {
                if let Some(pid) = candidate {
                    kills.push(KillDecision {
                        pid,
                        reason: KillReason::ProactiveLowSwap,
                    });
                }
            }
            self.last_free_swap = free_swap;
        }

        for kill in &kills {
            if let Some(record) = table.get_mut(kill.pid) {
                record.killed = true;
            }
        }
        (kills, counts)
    }
}
