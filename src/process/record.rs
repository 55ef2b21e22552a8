/*!
 * Process Record
 * Per-process signals, score state and freeze bookkeeping
 */

use super::core::types::{
    ActivityState, Capability, ForegroundServiceKind, ProcState, SchedGroup, Score,
    ShouldNotFreeze,
};
use crate::core::limits::UNKNOWN_ADJ;
use crate::core::types::{Adj, ConnectionId, InlineString, Pid, Timestamp, Uid};
use serde::{Deserialize, Serialize};

/// A running foreground service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundService {
    pub kind: ForegroundServiceKind,
    /// Capabilities granted by the declared service types (location, camera, microphone)
    #[serde(default)]
    pub types: Capability,
}

/// Intrinsic signals published by the component layer
///
/// These are read-only during a pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSignals {
    pub has_top_ui: bool,
    pub running_remote_animation: bool,
    pub active_instrumentation: bool,
    /// Scheduling class of a broadcast receiver currently running
    pub receiver: Option<SchedGroup>,
    /// Executing a service callback; `Some(true)` for foreground execution
    pub executing_service: Option<bool>,
    pub activities: Vec<ActivityState>,
    pub has_recent_tasks: bool,
    pub foreground_service: Option<ForegroundService>,
    pub has_overlay_ui: bool,
    /// Left the top state for an almost-perceptible binding; grants a short grace
    pub top_started_almost_perceptible: bool,
    pub force_important: bool,
    pub heavy_weight: bool,
    pub home: bool,
    pub previous: bool,
    pub started_services: bool,
    pub keep_warming: bool,
    pub has_shown_ui: bool,
    pub isolated: bool,
    pub sdk_sandbox: bool,
    pub freeze_exempt: bool,
    pub cpu_time_allowlisted: bool,
    pub external_provider_handles: bool,
    pub has_client_activities: bool,
    /// Resident memory sample used by the memory ranker and service-B demotion
    pub last_pss_kb: u64,
    /// Processes sharing a non-zero group are ranked together in the cached tier
    pub connection_group: u32,
    pub connection_importance: u32,
}

impl ProcessSignals {
    #[inline]
    #[must_use]
    pub fn has_activities(&self) -> bool {
        !self.activities.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn has_visible_activities(&self) -> bool {
        self.activities
            .iter()
            .any(|a| matches!(a, ActivityState::Visible { .. }))
    }
}

/// Score bookkeeping owned by the adjuster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjState {
    /// Final score of the latest evaluation
    pub cur: Score,
    /// Score before clamping to `max_adj`
    pub cur_raw_adj: Adj,
    pub cur_raw_proc_state: ProcState,
    /// Last committed score
    pub set: Score,
    pub set_raw_adj: Adj,
    /// Last state reported to observers
    pub reported_state: ProcState,
    /// Reason tag of the rule that decided the adj
    pub adj_type: InlineString,
    pub adj_seq: u64,
    pub completed_seq: u64,
    pub contains_cycle: bool,
    pub should_not_freeze: ShouldNotFreeze,
    pub schedule_like_top: bool,
    pub service_b: bool,
    pub service_high_ram: bool,
    /// Earliest time a temporary floor expires
    pub follow_up_at: Option<Timestamp>,
    pub has_foreground_activities: bool,
    pub has_visible_activities: bool,
    pub last_state_time: Timestamp,
    pub not_cached_since_idle: bool,
}

impl Default for AdjState {
    fn default() -> Self {
        Self {
            cur: Score::UNKNOWN,
            cur_raw_adj: UNKNOWN_ADJ,
            cur_raw_proc_state: ProcState::Nonexistent,
            set: Score::UNKNOWN,
            set_raw_adj: UNKNOWN_ADJ,
            reported_state: ProcState::Nonexistent,
            adj_type: InlineString::new(),
            adj_seq: 0,
            completed_seq: 0,
            contains_cycle: false,
            should_not_freeze: ShouldNotFreeze::empty(),
            schedule_like_top: false,
            service_b: false,
            service_high_ram: false,
            follow_up_at: None,
            has_foreground_activities: false,
            has_visible_activities: false,
            last_state_time: 0,
            not_cached_since_idle: true,
        }
    }
}

impl AdjState {
    /// Record a follow-up; the earliest expiry wins
    #[inline]
    pub fn note_follow_up(&mut self, at: Timestamp) {
        self.follow_up_at = Some(self.follow_up_at.map_or(at, |cur| cur.min(at)));
    }
}

/// Freezer state of a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRecord {
    pub frozen: bool,
    pub pending_freeze: bool,
}

impl FreezeRecord {
    #[inline(always)]
    #[must_use]
    pub const fn is_frozen_or_pending(&self) -> bool {
        self.frozen || self.pending_freeze
    }
}

/// Timestamps the rules read
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessTimes {
    pub last_top_time: Timestamp,
    pub last_activity_time: Timestamp,
    pub last_provider_time: Timestamp,
    /// Last time a started service was active
    pub last_service_activity: Timestamp,
    /// When the process last became empty
    pub last_empty_time: Timestamp,
}

/// A schedulable process as seen by the adjuster
#[derive(Debug, Clone)]
#[repr(C, align(64))]
pub struct ProcessRecord {
    pub pid: Pid,
    pub uid: Uid,
    pub name: InlineString,
    /// Hard ceiling; the final adj never exceeds it
    pub max_adj: Adj,
    /// Whether the process has a live thread attached
    pub alive: bool,
    pub killed: bool,
    pub signals: ProcessSignals,
    pub times: ProcessTimes,
    pub state: AdjState,
    pub freeze: FreezeRecord,
    /// Services this process hosts (inbound edges)
    pub(crate) bindings_in: Vec<ConnectionId>,
    /// Services this process is bound to (outbound edges)
    pub(crate) bindings_out: Vec<ConnectionId>,
    pub(crate) providers_in: Vec<ConnectionId>,
    pub(crate) providers_out: Vec<ConnectionId>,
    /// Host app of an sdk-sandbox or isolated process
    pub attributed_to: Option<Pid>,
}

impl ProcessRecord {
    #[inline]
    #[must_use]
    pub fn new(pid: Pid, uid: Uid, name: impl Into<InlineString>) -> Self {
        Self {
            pid,
            uid,
            name: name.into(),
            max_adj: UNKNOWN_ADJ,
            alive: true,
            killed: false,
            signals: ProcessSignals::default(),
            times: ProcessTimes::default(),
            state: AdjState::default(),
            freeze: FreezeRecord::default(),
            bindings_in: Vec::new(),
            bindings_out: Vec::new(),
            providers_in: Vec::new(),
            providers_out: Vec::new(),
            attributed_to: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_max_adj(mut self, max_adj: Adj) -> Self {
        self.max_adj = max_adj;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_signals(mut self, signals: ProcessSignals) -> Self {
        self.signals = signals;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_times(mut self, times: ProcessTimes) -> Self {
        self.times = times;
        self
    }

    #[inline]
    #[must_use]
    pub fn attributed_to(mut self, owner: Pid) -> Self {
        self.attributed_to = Some(owner);
        self
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive && !self.killed
    }

    /// Sandboxed processes that depend on an owning app
    #[inline(always)]
    #[must_use]
    pub const fn is_sandboxed(&self) -> bool {
        self.signals.isolated || self.signals.sdk_sandbox
    }

    #[inline]
    #[must_use]
    pub fn has_clients(&self) -> bool {
        !self.bindings_in.is_empty() || !self.providers_in.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn hosts_services(&self) -> bool {
        !self.bindings_in.is_empty()
    }

    pub fn inbound_services(&self) -> &[ConnectionId] {
        &self.bindings_in
    }

    pub fn outbound_services(&self) -> &[ConnectionId] {
        &self.bindings_out
    }

    pub fn inbound_providers(&self) -> &[ConnectionId] {
        &self.providers_in
    }

    pub fn outbound_providers(&self) -> &[ConnectionId] {
        &self.providers_out
    }
}
