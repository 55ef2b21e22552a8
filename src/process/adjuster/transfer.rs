/*!
 * Edge Transfer
 *
 * Pure functions folding a client's score into its host across one
 * service binding or provider connection. The evaluator applies the
 * returned [`TransferOutcome`]; the connection fast path only asks
 * whether it would change anything.
 */

use super::config::{ms, TimingConfig};
use crate::core::limits::*;
use crate::core::types::{Adj, Timestamp};
use crate::process::connection::ServiceConnection;
use crate::process::core::types::{
    default_capability_for, BindFlags, Capability, ProcState, SchedGroup, Score, ShouldNotFreeze,
};
use crate::process::record::ProcessRecord;

/// The host side of an edge: running values plus the traits the rules read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostView {
    pub score: Score,
    pub should_not_freeze: ShouldNotFreeze,
    pub shown_ui: bool,
    pub home: bool,
    pub isolated: bool,
    pub sdk_sandbox: bool,
    pub instrumentation: bool,
}

impl HostView {
    /// View over the raw values currently stored on the record
    pub fn of(record: &ProcessRecord) -> Self {
        let state = &record.state;
        Self {
            score: Score {
                adj: state.cur_raw_adj,
                proc_state: state.cur_raw_proc_state,
                capability: state.cur.capability,
                sched_group: state.cur.sched_group,
            },
            should_not_freeze: state.should_not_freeze,
            shown_ui: record.signals.has_shown_ui,
            home: record.signals.home,
            isolated: record.signals.isolated,
            sdk_sandbox: record.signals.sdk_sandbox,
            instrumentation: record.signals.active_instrumentation,
        }
    }

    #[inline]
    fn is_cached(&self) -> bool {
        self.score.adj >= CACHED_APP_MIN_ADJ
    }
}

/// The client side of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientView {
    /// Raw adj and state, before the client's own ceiling
    pub score: Score,
    pub should_not_freeze: ShouldNotFreeze,
    pub contains_cycle: bool,
    /// Finished evaluating in the current pass
    pub completed: bool,
}

impl ClientView {
    pub fn of(record: &ProcessRecord, seq: u64) -> Self {
        let state = &record.state;
        Self {
            score: Score {
                adj: state.cur_raw_adj,
                proc_state: state.cur_raw_proc_state,
                capability: state.cur.capability,
                sched_group: state.cur.sched_group,
            },
            should_not_freeze: state.should_not_freeze,
            contains_cycle: state.contains_cycle,
            completed: state.completed_seq >= seq,
        }
    }

    #[inline]
    fn is_cached(&self) -> bool {
        self.score.adj >= CACHED_APP_MIN_ADJ
    }
}

/// Pass-wide inputs to the transfer rules
#[derive(Debug, Clone, Copy)]
pub struct TransferEnv<'a> {
    pub now: Timestamp,
    pub awake: bool,
    pub timing: &'a TimingConfig,
    pub cycle_reeval: bool,
    /// CPU-time capability drives the freezer instead of should-not-freeze reasons
    pub cpu_time: bool,
}

/// The host values after one edge has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub score: Score,
    pub should_not_freeze: ShouldNotFreeze,
    pub reason: Option<&'static str>,
    pub schedule_like_top: bool,
    pub tracked_proc_state: Option<ProcState>,
    pub treat_like_activity: bool,
    /// The client sits on an unresolved cycle; the host joins it
    pub hit_cycle: bool,
    /// The edge was skipped until the cycle resolves
    pub skipped: bool,
    /// A non-cached client would pull a cached host out of the cached tier
    pub uncaches_host: bool,
}

impl TransferOutcome {
    fn unchanged(host: &HostView) -> Self {
        Self {
            score: host.score,
            should_not_freeze: host.should_not_freeze,
            reason: None,
            schedule_like_top: false,
            tracked_proc_state: None,
            treat_like_activity: false,
            hit_cycle: false,
            skipped: false,
            uncaches_host: false,
        }
    }

    /// Whether applying the outcome would make the host more important
    pub fn updated(&self, host: &HostView, cpu_time: bool) -> bool {
        let prev = host.score;
        if self.score.adj < prev.adj
            || self.score.proc_state < prev.proc_state
            || self.score.sched_group > prev.sched_group
        {
            return true;
        }
        let mask = if cpu_time {
            Capability::all()
        } else {
            !Capability::CPU_TIME
        };
        let (cur, before) = (self.score.capability & mask, prev.capability & mask);
        if cur != before && cur.contains(before) {
            return true;
        }
        !cpu_time && !host.should_not_freeze.contains(self.should_not_freeze)
    }
}

/// Whether a client on an unresolved cycle should be ignored for now
pub fn skip_due_to_cycle(host: &Score, client: &ClientView, cycle_reeval: bool) -> bool {
    if !client.contains_cycle || client.completed {
        return false;
    }
    if !cycle_reeval {
        return true;
    }
    // During re-evaluation, partial client values are used only if they help
    client.score.proc_state >= host.proc_state
        && client.score.adj >= host.adj
        && host.capability.contains(client.score.capability)
}

/// Background-start permission carried by a client
pub fn bfsl_from_client(client: &ClientView) -> Capability {
    if client.score.proc_state < ProcState::ForegroundService {
        Capability::BFSL
    } else {
        client.score.capability & Capability::BFSL
    }
}

/// CPU time flows to the host unless the binding allows freezing it
pub fn cpu_time_from_client(flags: BindFlags, client: &ClientView) -> Capability {
    if flags.contains(BindFlags::ALLOW_FREEZE) {
        Capability::empty()
    } else {
        client.score.capability & Capability::CPU_TIME
    }
}

/// Capabilities granted by binding flags while the client holds them
pub fn propagated_capability(
    flags: BindFlags,
    client: &ClientView,
    client_state: ProcState,
    host: &HostView,
) -> Capability {
    let held = client.score.capability;
    let mut cap = Capability::empty();
    if flags.contains(BindFlags::INCLUDE_CAPABILITIES) {
        cap |= held;
    }
    if held.contains(Capability::POWER_RESTRICTED_NETWORK) {
        if client_state > ProcState::BoundForegroundService
            || flags.contains(BindFlags::BYPASS_POWER_NETWORK_RESTRICTIONS)
        {
            cap |= Capability::POWER_RESTRICTED_NETWORK;
        }
    }
    if held.contains(Capability::USER_RESTRICTED_NETWORK)
        && client_state <= ProcState::ImportantForeground
        && flags.contains(BindFlags::BYPASS_USER_NETWORK_RESTRICTIONS)
    {
        cap |= Capability::USER_RESTRICTED_NETWORK;
    }
    if held.contains(Capability::FOREGROUND_AUDIO_CONTROL) && host.sdk_sandbox {
        cap |= Capability::FOREGROUND_AUDIO_CONTROL;
    }
    cap
}

/// A waive-priority binding contributes no score but keeps the host thawed
pub fn waive_priority(client: &ClientView) -> ShouldNotFreeze {
    if client.score.adj < CACHED_APP_MIN_ADJ {
        ShouldNotFreeze::BIND_WAIVE_PRIORITY
    } else {
        ShouldNotFreeze::empty()
    }
}

/// Client values seen through an allow-oom-management binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OomManaged {
    pub client_adj: Adj,
    pub client_state: ProcState,
    pub reason: Option<&'static str>,
    pub should_not_freeze: ShouldNotFreeze,
    pub uncaches_host: bool,
}

/// An allow-oom-management binding treats the host like a started service
pub fn oom_management(
    host: &HostView,
    client: &ClientView,
    client_state: ProcState,
    conn: &ServiceConnection,
    env: &TransferEnv<'_>,
) -> OomManaged {
    let mut out = OomManaged {
        client_adj: client.score.adj,
        client_state,
        reason: None,
        should_not_freeze: ShouldNotFreeze::empty(),
        uncaches_host: false,
    };
    if client.score.adj < CACHED_APP_MIN_ADJ {
        out.should_not_freeze = ShouldNotFreeze::BINDER_ALLOW_OOM_MANAGEMENT;
    }
    let adj = host.score.adj;
    if host.shown_ui && !host.home {
        if adj > client.score.adj {
            out.reason = Some("cch-bound-ui-services");
        }
        out.uncaches_host = host.is_cached();
        out.client_adj = adj;
        out.client_state = host.score.proc_state;
    } else if env.now >= conn.service_last_activity + ms(env.timing.max_service_inactivity) {
        if adj > client.score.adj {
            out.reason = Some("cch-bound-services");
        }
        out.client_adj = adj;
    }
    out
}

/// Adj a binding grants its host; `persistent` marks the persistent-service floor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAdj {
    pub adj: Adj,
    pub persistent: bool,
}

/// Flag-selected adj floor for a host weaker than its client
pub fn bound_adj(flags: BindFlags, host_adj: Adj, client_adj: Adj) -> BoundAdj {
    let plain = |adj| BoundAdj {
        adj,
        persistent: false,
    };
    if flags.intersects(BindFlags::ABOVE_CLIENT | BindFlags::IMPORTANT) {
        return if client_adj >= PERSISTENT_SERVICE_ADJ {
            plain(client_adj)
        } else {
            BoundAdj {
                adj: PERSISTENT_SERVICE_ADJ,
                persistent: true,
            }
        };
    }

    // The lower bound follows the first tier whose client condition held
    let mut lower_bound = VISIBLE_APP_ADJ;
    if flags.contains(BindFlags::NOT_PERCEPTIBLE) && client_adj <= PERCEPTIBLE_APP_ADJ {
        lower_bound = PERCEPTIBLE_LOW_APP_ADJ;
        if host_adj >= lower_bound {
            return plain(PERCEPTIBLE_LOW_APP_ADJ);
        }
    }
    let almost = flags.contains(BindFlags::ALMOST_PERCEPTIBLE) && client_adj < PERCEPTIBLE_APP_ADJ;
    if almost && !flags.contains(BindFlags::NOT_FOREGROUND) {
        lower_bound = PERCEPTIBLE_APP_ADJ;
        if host_adj >= lower_bound {
            return plain(PERCEPTIBLE_APP_ADJ + 1);
        }
    }
    if almost && flags.contains(BindFlags::NOT_FOREGROUND) {
        lower_bound = PERCEPTIBLE_MEDIUM_APP_ADJ + 2;
        if host_adj >= lower_bound {
            return plain(PERCEPTIBLE_MEDIUM_APP_ADJ + 2);
        }
    }
    if flags.contains(BindFlags::NOT_VISIBLE) && client_adj < PERCEPTIBLE_APP_ADJ {
        lower_bound = PERCEPTIBLE_APP_ADJ;
        if host_adj >= lower_bound {
            return plain(PERCEPTIBLE_APP_ADJ);
        }
    }
    if client_adj >= PERCEPTIBLE_APP_ADJ {
        return plain(client_adj);
    }
    if flags.contains(BindFlags::TREAT_LIKE_VISIBLE_FOREGROUND_SERVICE)
        && client_adj <= VISIBLE_APP_ADJ
        && host_adj > VISIBLE_APP_ADJ
    {
        return plain(VISIBLE_APP_ADJ);
    }
    if host_adj > VISIBLE_APP_ADJ {
        plain(client_adj.max(lower_bound))
    } else {
        plain(host_adj)
    }
}

/// State a client lends through a binding, never better than bound tiers
pub fn bound_proc_state(
    flags: BindFlags,
    client_state: ProcState,
    awake: bool,
) -> ProcState {
    if !flags.intersects(BindFlags::NOT_FOREGROUND | BindFlags::IMPORTANT_BACKGROUND) {
        if client_state < ProcState::Top {
            if flags.contains(BindFlags::TREAT_LIKE_VISIBLE_FOREGROUND_SERVICE) {
                ProcState::ForegroundService
            } else if flags.contains(BindFlags::FOREGROUND_SERVICE)
                || (awake && flags.contains(BindFlags::FOREGROUND_SERVICE_WHILE_AWAKE))
            {
                ProcState::BoundForegroundService
            } else {
                ProcState::ImportantForeground
            }
        } else if client_state == ProcState::Top {
            ProcState::BoundTop
        } else {
            client_state
        }
    } else if !flags.contains(BindFlags::IMPORTANT_BACKGROUND) {
        client_state.max(ProcState::TransientBackground)
    } else {
        client_state.max(ProcState::ImportantBackground)
    }
}

/// Scheduling class a client lends through a binding
pub fn bound_sched_group(flags: BindFlags, host: SchedGroup, client: SchedGroup) -> SchedGroup {
    if flags.intersects(BindFlags::NOT_FOREGROUND | BindFlags::IMPORTANT_BACKGROUND)
        || client <= host
    {
        return host;
    }
    if flags.contains(BindFlags::IMPORTANT) {
        client
    } else {
        host.max(SchedGroup::Default)
    }
}

/// A system client can ask for its host to be scheduled like the top app
pub fn schedule_like_top(flags: BindFlags, client: &ClientView) -> bool {
    flags.contains(BindFlags::SCHEDULE_LIKE_TOP_APP) && client.score.proc_state < ProcState::Top
}

/// Floor for a host following a visible client activity
pub fn adjust_with_activity(
    flags: BindFlags,
    activity_visible: bool,
    host_adj: Adj,
) -> Option<(Adj, Option<SchedGroup>)> {
    if !flags.contains(BindFlags::ADJUST_WITH_ACTIVITY)
        || !activity_visible
        || host_adj <= FOREGROUND_APP_ADJ
    {
        return None;
    }
    let group = if flags.contains(BindFlags::NOT_FOREGROUND) {
        None
    } else if flags.contains(BindFlags::IMPORTANT) {
        Some(SchedGroup::TopAppBound)
    } else {
        Some(SchedGroup::Default)
    };
    Some((FOREGROUND_APP_ADJ, group))
}

/// Fold one service binding into its host
pub fn service_transfer(
    host: &HostView,
    client: &ClientView,
    conn: &ServiceConnection,
    env: &TransferEnv<'_>,
) -> TransferOutcome {
    let mut out = TransferOutcome::unchanged(host);
    if client.contains_cycle {
        out.hit_cycle = true;
        if skip_due_to_cycle(&host.score, client, env.cycle_reeval) {
            out.skipped = true;
            return out;
        }
    }

    let flags = conn.flags;
    let mut adj = host.score.adj;
    let mut state = host.score.proc_state;
    let mut group = host.score.sched_group;
    let mut cap = host.score.capability;

    out.should_not_freeze |= client.should_not_freeze;
    cap |= bfsl_from_client(client);
    cap |= cpu_time_from_client(flags, client);

    let mut client_state = client.score.proc_state;
    if !flags.contains(BindFlags::WAIVE_PRIORITY) {
        cap |= propagated_capability(flags, client, client_state, host);

        if client_state >= ProcState::CachedActivity {
            client_state = ProcState::CachedEmpty;
        }
        let mut client_adj = client.score.adj;
        if flags.contains(BindFlags::ALLOW_OOM_MANAGEMENT) {
            let managed = oom_management(host, client, client_state, conn, env);
            client_adj = managed.client_adj;
            client_state = managed.client_state;
            out.should_not_freeze |= managed.should_not_freeze;
            out.uncaches_host |= managed.uncaches_host;
            out.reason = managed.reason.or(out.reason);
        }

        if adj > client_adj {
            if host.shown_ui
                && !host.home
                && client_adj > CACHING_UI_SERVICE_CLIENT_ADJ_THRESHOLD
            {
                if adj >= CACHED_APP_MIN_ADJ {
                    out.reason = Some("cch-bound-ui-services");
                }
            } else {
                let mut bound = bound_adj(flags, adj, client_adj);
                if bound.persistent {
                    group = group.max(SchedGroup::Default);
                    state = state.min(ProcState::Persistent);
                    out.tracked_proc_state = Some(ProcState::Persistent);
                }
                if !client.is_cached() && host.is_cached() {
                    out.uncaches_host = true;
                }
                if bound.adj == client_adj && host.isolated {
                    // Bound isolated processes rank just behind their client
                    bound.adj = client_adj + 1;
                }
                if adj > bound.adj {
                    adj = bound.adj;
                    out.reason = Some("service");
                }
            }
        }

        group = bound_sched_group(flags, group, client.score.sched_group);
        if client_state == ProcState::Top
            && !flags.intersects(BindFlags::NOT_FOREGROUND | BindFlags::IMPORTANT_BACKGROUND)
            && flags.contains(BindFlags::INCLUDE_CAPABILITIES)
        {
            cap |= client.score.capability;
        }
        client_state = bound_proc_state(flags, client_state, env.awake);

        if schedule_like_top(flags, client) {
            group = group.max(SchedGroup::TopApp);
            out.schedule_like_top = true;
        }
        if out.tracked_proc_state.is_none() {
            out.tracked_proc_state = Some(client_state);
        }
        if state > client_state {
            state = client_state;
            out.reason.get_or_insert("service");
        }
    } else {
        out.should_not_freeze |= waive_priority(client);
    }

    if flags.contains(BindFlags::TREAT_LIKE_ACTIVITY) {
        out.treat_like_activity = true;
        if client_state <= ProcState::CachedActivity && state > ProcState::CachedActivity {
            state = ProcState::CachedActivity;
            out.reason = Some("cch-as-act");
        }
    }

    if let Some((floor, lent)) = adjust_with_activity(flags, conn.activity_visible, adj) {
        adj = floor;
        if let Some(lent) = lent {
            group = group.max(lent);
        }
        out.reason = Some("service");
    }

    cap |= default_capability_for(state, host.instrumentation);
    if state > ProcState::BoundForegroundService {
        cap.remove(Capability::BFSL);
    }

    out.score = Score {
        adj,
        proc_state: state,
        capability: cap,
        sched_group: group,
    };
    out
}

/// Fold one provider connection into its host
pub fn provider_transfer(
    host: &HostView,
    client: &ClientView,
    env: &TransferEnv<'_>,
) -> TransferOutcome {
    let mut out = TransferOutcome::unchanged(host);
    if client.contains_cycle {
        out.hit_cycle = true;
        if skip_due_to_cycle(&host.score, client, env.cycle_reeval) {
            out.skipped = true;
            return out;
        }
    }

    let mut adj = host.score.adj;
    let mut state = host.score.proc_state;
    let mut group = host.score.sched_group;
    let mut cap = host.score.capability;
    let client_adj = client.score.adj;

    cap |= bfsl_from_client(client);
    cap |= client.score.capability & Capability::CPU_TIME;
    out.should_not_freeze |= client.should_not_freeze;

    let mut client_state = client.score.proc_state;
    if client_state >= ProcState::CachedActivity {
        client_state = ProcState::CachedEmpty;
    }

    if adj > client_adj {
        if host.shown_ui && !host.home && client_adj > PERCEPTIBLE_APP_ADJ {
            out.reason = Some("cch-ui-provider");
        } else {
            adj = client_adj.max(FOREGROUND_APP_ADJ);
            out.reason = Some("provider");
        }
        if host.is_cached() && !client.is_cached() {
            out.uncaches_host = true;
        }
    }

    if client_state <= ProcState::ForegroundService {
        out.reason.get_or_insert("provider");
        client_state = if client_state == ProcState::Top {
            ProcState::BoundTop
        } else {
            ProcState::BoundForegroundService
        };
    }
    out.tracked_proc_state = Some(client_state);
    state = state.min(client_state);
    if client.score.sched_group > group {
        group = group.max(SchedGroup::Default);
    }
    if state > ProcState::BoundForegroundService {
        cap.remove(Capability::BFSL);
    }

    out.score = Score {
        adj,
        proc_state: state,
        capability: cap,
        sched_group: group,
    };
    out
}

/// Dry run: would this binding change its host's committed values
pub fn service_would_change(
    host: &HostView,
    client: &ClientView,
    conn: &ServiceConnection,
    env: &TransferEnv<'_>,
) -> bool {
    let out = service_transfer(host, client, conn, env);
    out.uncaches_host || out.updated(host, env.cpu_time)
}

/// Dry run for a provider connection
pub fn provider_would_change(host: &HostView, client: &ClientView, env: &TransferEnv<'_>) -> bool {
    let out = provider_transfer(host, client, env);
    out.uncaches_host || out.updated(host, env.cpu_time)
}
