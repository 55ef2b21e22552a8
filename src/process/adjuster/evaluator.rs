/*!
 * Score Evaluator
 *
 * Computes the raw score of one process from its intrinsic rules and the
 * scores of its clients. Client evaluation runs on an explicit frame stack
 * guarded by the pass sequence number, so a cyclic graph never recurses
 * and an in-progress process is detected instead of re-entered.
 */

use super::config::{AdjusterConfig, Features};
use super::rules::{cpu_capability, fold_rules, Folded, RuleContext, INTRINSIC_RULES, LATE_RULES};
use super::signals::GlobalSignals;
use super::transfer::{
    provider_transfer, service_transfer, ClientView, HostView, TransferEnv, TransferOutcome,
};
use crate::core::limits::*;
use crate::core::types::{Adj, ConnectionId, Pid, Timestamp};
use crate::process::core::types::{
    default_capability_for, BindFlags, Capability, ProcState, SchedGroup, Score,
};
use crate::process::record::ProcessRecord;
use crate::process::table::ProcessTable;
use ahash::RandomState;
use std::collections::HashSet;

/// Inputs shared by every evaluation in one pass
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub seq: u64,
    pub now: Timestamp,
    pub full: bool,
    pub globals: &'a GlobalSignals,
    pub config: &'a AdjusterConfig,
    pub features: Features,
}

impl<'a> PassContext<'a> {
    fn transfer_env(&self, cycle_reeval: bool) -> TransferEnv<'a> {
        TransferEnv {
            now: self.now,
            awake: self.globals.awake,
            timing: &self.config.timing,
            cycle_reeval,
            cpu_time: self.features.contains(Features::CPU_TIME_CAPABILITY),
        }
    }
}

/// Scratch state owned by one pass
#[derive(Debug, Default)]
pub struct WorkingSet {
    /// Processes of the pass; evaluated from the back
    pub order: Vec<Pid>,
    pub in_cycle: HashSet<Pid, RandomState>,
    pub potential_cycles: bool,
    pub cycle_rounds: u32,
    pub converged: bool,
}

impl WorkingSet {
    pub fn new(order: Vec<Pid>, potential_cycles: bool) -> Self {
        Self {
            order,
            potential_cycles,
            converged: true,
            ..Default::default()
        }
    }
}

/// Nothing can raise a process past top adj, a foreground class and the top state
#[inline]
fn saturated(score: &Score) -> bool {
    score.adj <= FOREGROUND_APP_ADJ
        && score.sched_group > SchedGroup::Background
        && score.proc_state <= ProcState::Top
}

/// Bound below a client it sits above; adj is nudged into the next tier
pub fn modify_raw_adj(adj: Adj) -> Adj {
    if adj < FOREGROUND_APP_ADJ {
        adj
    } else if adj < VISIBLE_APP_ADJ {
        VISIBLE_APP_ADJ
    } else if adj < PERCEPTIBLE_APP_ADJ {
        PERCEPTIBLE_APP_ADJ
    } else if adj < PERCEPTIBLE_LOW_APP_ADJ {
        PERCEPTIBLE_LOW_APP_ADJ
    } else if adj < CACHED_APP_MIN_ADJ {
        CACHED_APP_MIN_ADJ
    } else if adj < CACHED_APP_MAX_ADJ {
        adj + 1
    } else {
        adj
    }
}

/// Whether the process sits above one of its own services
pub(crate) fn binds_above_client(table: &ProcessTable, record: &ProcessRecord) -> bool {
    record
        .outbound_services()
        .iter()
        .filter_map(|id| table.service(*id))
        .any(|conn| conn.has_flag(BindFlags::ABOVE_CLIENT))
}

/// Reset every process not yet evaluated in this pass
pub fn prepare(table: &mut ProcessTable, ws: &WorkingSet, seq: u64) {
    for pid in &ws.order {
        let Some(record) = table.get_mut(*pid) else {
            continue;
        };
        let state = &mut record.state;
        if state.adj_seq != seq {
            state.contains_cycle = false;
            state.cur_raw_proc_state = ProcState::CachedEmpty;
            state.cur_raw_adj = UNKNOWN_ADJ;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Enter { pid: Pid, hint: Adj },
    Finish { pid: Pid, prev: Score },
}

enum Entered {
    /// Evaluation ended early with the given change flag
    Done(bool),
    /// Intrinsic part written; clients pushed, finish pending
    Pending { prev: Score, clients: Vec<Pid> },
}

/// Evaluate `root` and, if `compute_clients`, every client it depends on
///
/// Returns whether the root's adj, state or capability improved relative to
/// its previous evaluation.
pub fn evaluate(
    table: &mut ProcessTable,
    pass: &PassContext<'_>,
    ws: &mut WorkingSet,
    root: Pid,
    hint: Adj,
    compute_clients: bool,
    cycle_reeval: bool,
) -> bool {
    let mut stack = vec![Frame::Enter { pid: root, hint }];
    let mut root_changed = false;

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter { pid, hint } => {
                match enter(table, pass, ws, pid, hint, compute_clients, cycle_reeval) {
                    Entered::Done(changed) => {
                        if pid == root && stack.is_empty() {
                            root_changed = changed;
                        }
                    }
                    Entered::Pending { prev, clients } => {
                        stack.push(Frame::Finish { pid, prev });
                        for client in clients.into_iter().rev() {
                            stack.push(Frame::Enter { pid: client, hint });
                        }
                    }
                }
            }
            Frame::Finish { pid, prev } => {
                let changed = finish(table, pass, ws, pid, prev, cycle_reeval);
                if pid == root && stack.is_empty() {
                    root_changed = changed;
                }
            }
        }
    }
    root_changed
}

fn enter(
    table: &mut ProcessTable,
    pass: &PassContext<'_>,
    ws: &mut WorkingSet,
    pid: Pid,
    hint: Adj,
    compute_clients: bool,
    cycle_reeval: bool,
) -> Entered {
    let seq = pass.seq;
    let Some(record) = table.get(pid) else {
        return Entered::Done(false);
    };

    if record.state.adj_seq == seq {
        if record.state.completed_seq != seq {
            // Reached again while its own clients are still being evaluated
            if let Some(record) = table.get_mut(pid) {
                record.state.contains_cycle = true;
            }
            ws.in_cycle.insert(pid);
        }
        return Entered::Done(false);
    }

    let prev = record.state.cur;
    if !record.is_alive() {
        if let Some(record) = table.get_mut(pid) {
            let state = &mut record.state;
            state.adj_seq = seq;
            state.cur_raw_adj = CACHED_APP_MAX_ADJ;
            state.cur_raw_proc_state = ProcState::CachedEmpty;
            state.cur = Score::new(CACHED_APP_MAX_ADJ, ProcState::CachedEmpty, SchedGroup::Background);
            state.adj_type = "dead".into();
            state.completed_seq = seq;
        }
        return Entered::Done(false);
    }

    if record.max_adj <= FOREGROUND_APP_ADJ {
        return Entered::Done(evaluate_fixed(table, pass, pid, prev));
    }

    let cycle_prev = cycle_reeval.then(|| Score {
        adj: record.state.cur_raw_adj,
        proc_state: record.state.cur_raw_proc_state,
        capability: record.state.cur.capability,
        sched_group: record.state.cur.sched_group,
    });
    let mut ctx = RuleContext {
        pid,
        signals: &record.signals,
        times: &record.times,
        set: record.state.set,
        last_state_time: record.state.last_state_time,
        globals: pass.globals,
        timing: &pass.config.timing,
        now: pass.now,
        cycle_prev,
        treat_like_activity: false,
        current: Score::UNKNOWN,
    };
    let mut folded = Folded::baseline(hint);
    fold_rules(&mut ctx, INTRINSIC_RULES, &mut folded);

    let clients = if compute_clients && !saturated(&folded.score) {
        let mut clients = table.clients_of(pid);
        clients.retain(|c| *c != pid);
        clients
    } else {
        Vec::new()
    };

    if let Some(record) = table.get_mut(pid) {
        let state = &mut record.state;
        state.adj_seq = seq;
        state.follow_up_at = folded.follow_up_at;
        state.schedule_like_top = false;
        if !cycle_reeval {
            state.should_not_freeze = Default::default();
        }
        state.cur_raw_adj = folded.score.adj;
        state.cur_raw_proc_state = folded.score.proc_state;
        state.cur.sched_group = folded.score.sched_group;
        state.cur.capability = folded.score.capability;
        state.adj_type = folded.reason.into();
        state.has_foreground_activities = folded.foreground_activities;
        state.has_visible_activities = folded.visible_activities;
    }
    Entered::Pending { prev, clients }
}

/// Processes pinned at foreground or better skip the rule set entirely
fn evaluate_fixed(table: &mut ProcessTable, pass: &PassContext<'_>, pid: Pid, prev: Score) -> bool {
    let Some(record) = table.get_mut(pid) else {
        return false;
    };
    let max_adj = record.max_adj;
    let mut group = SchedGroup::Default;
    let mut state = ProcState::Persistent;
    let mut reason = "fixed";
    let showing_ui = if pass.globals.is_top(pid) {
        group = SchedGroup::TopApp;
        reason = "pers-top-activity";
        true
    } else if record.signals.has_top_ui {
        group = SchedGroup::TopApp;
        reason = "pers-top-ui";
        true
    } else {
        record.signals.has_visible_activities()
    };
    if showing_ui {
        if pass.globals.awake || record.signals.running_remote_animation {
            state = ProcState::PersistentUi;
            group = SchedGroup::TopApp;
        } else {
            state = ProcState::BoundForegroundService;
            group = SchedGroup::Restricted;
        }
    }

    let st = &mut record.state;
    st.adj_seq = pass.seq;
    st.follow_up_at = None;
    st.has_foreground_activities = false;
    st.cur_raw_adj = max_adj;
    st.cur_raw_proc_state = state;
    st.cur = Score {
        adj: max_adj,
        proc_state: state,
        capability: Capability::all(),
        sched_group: group,
    };
    st.adj_type = reason.into();
    st.completed_seq = pass.seq;
    st.cur.adj < prev.adj || st.cur.proc_state < prev.proc_state
}

/// Running fold over a host's inbound edges
struct EdgeFold {
    host: HostView,
    reason: Option<&'static str>,
    schedule_like_top: bool,
    treat_like_activity: bool,
    hit_cycle: bool,
    tracked: Vec<(ConnectionId, ProcState)>,
}

impl EdgeFold {
    fn absorb(&mut self, out: TransferOutcome, conn: Option<ConnectionId>) {
        self.hit_cycle |= out.hit_cycle;
        if out.skipped {
            return;
        }
        self.host.score = out.score;
        self.host.should_not_freeze = out.should_not_freeze;
        if out.reason.is_some() {
            self.reason = out.reason;
        }
        self.schedule_like_top |= out.schedule_like_top;
        self.treat_like_activity |= out.treat_like_activity;
        if let (Some(id), Some(tracked)) = (conn, out.tracked_proc_state) {
            self.tracked.push((id, tracked));
        }
    }
}

fn finish(
    table: &mut ProcessTable,
    pass: &PassContext<'_>,
    ws: &mut WorkingSet,
    pid: Pid,
    prev: Score,
    cycle_reeval: bool,
) -> bool {
    let seq = pass.seq;
    let env = pass.transfer_env(cycle_reeval);
    let Some(record) = table.get(pid) else {
        return false;
    };

    let mut fold = EdgeFold {
        host: HostView::of(record),
        reason: None,
        schedule_like_top: false,
        treat_like_activity: false,
        hit_cycle: false,
        tracked: Vec::new(),
    };

    for conn in record
        .inbound_services()
        .iter()
        .filter_map(|id| table.service(*id))
    {
        if saturated(&fold.host.score) {
            break;
        }
        let client_pid = conn.effective_client();
        if client_pid == pid {
            continue;
        }
        let Some(client) = table.get(client_pid) else {
            continue;
        };
        let out = service_transfer(&fold.host, &ClientView::of(client, seq), conn, &env);
        fold.absorb(out, Some(conn.id));
    }

    for conn in record
        .inbound_providers()
        .iter()
        .filter_map(|id| table.provider(*id))
    {
        if saturated(&fold.host.score) {
            break;
        }
        if conn.client == pid {
            continue;
        }
        let Some(client) = table.get(conn.client) else {
            continue;
        };
        let out = provider_transfer(&fold.host, &ClientView::of(client, seq), &env);
        fold.absorb(out, None);
    }

    let mut ctx = RuleContext {
        pid,
        signals: &record.signals,
        times: &record.times,
        set: record.state.set,
        last_state_time: record.state.last_state_time,
        globals: pass.globals,
        timing: &pass.config.timing,
        now: pass.now,
        cycle_prev: None,
        treat_like_activity: fold.treat_like_activity,
        current: fold.host.score,
    };
    let mut late = Folded {
        score: fold.host.score,
        reason: "",
        follow_up_at: None,
        foreground_activities: false,
        visible_activities: false,
    };
    fold_rules(&mut ctx, LATE_RULES, &mut late);
    if !late.reason.is_empty() {
        fold.reason = Some(late.reason);
    }

    let mut score = late.score;
    if !pass.full && score.adj == SERVICE_ADJ && record.state.service_b {
        score.adj = SERVICE_B_ADJ;
    }

    score.capability |= default_capability_for(score.proc_state, record.signals.active_instrumentation);
    if pass.features.contains(Features::CPU_TIME_CAPABILITY) {
        score.capability |= cpu_capability(&record.signals, record.state.has_foreground_activities);
    }
    if score.proc_state > ProcState::BoundForegroundService {
        score.capability.remove(Capability::BFSL);
    }

    let raw_adj = score.adj;
    if binds_above_client(table, record) {
        score.adj = modify_raw_adj(score.adj);
    }
    if score.adj > record.max_adj {
        score.adj = record.max_adj;
        if record.max_adj <= PERCEPTIBLE_LOW_APP_ADJ {
            score.sched_group = SchedGroup::Default;
        }
    }
    if score.proc_state >= ProcState::BoundForegroundService
        && !pass.globals.awake
        && !fold.schedule_like_top
    {
        score.sched_group = score.sched_group.min(SchedGroup::Restricted);
    }

    let changed = score.adj < prev.adj
        || score.proc_state < prev.proc_state
        || score.capability != prev.capability;

    let EdgeFold {
        host,
        reason,
        schedule_like_top,
        hit_cycle,
        tracked,
        ..
    } = fold;
    let late_follow_up = late.follow_up_at;

    for (id, state) in tracked {
        if let Some(conn) = table.service_mut(id) {
            conn.tracked_proc_state = state;
        }
    }
    if hit_cycle {
        ws.in_cycle.insert(pid);
    }

    if let Some(record) = table.get_mut(pid) {
        let state = &mut record.state;
        state.cur_raw_adj = raw_adj;
        state.cur_raw_proc_state = score.proc_state;
        state.cur = score;
        state.should_not_freeze = host.should_not_freeze;
        state.schedule_like_top = schedule_like_top;
        if let Some(reason) = reason {
            state.adj_type = reason.into();
        }
        if let Some(at) = late_follow_up {
            state.note_follow_up(at);
        }
        if hit_cycle {
            state.contains_cycle = true;
        }
        state.completed_seq = seq;
    }
    changed
}

/// Evaluate every process of the working set, least important first
pub fn evaluate_all(table: &mut ProcessTable, pass: &PassContext<'_>, ws: &mut WorkingSet) -> bool {
    let compute_clients = pass.full || ws.potential_cycles;
    let mut retry = false;
    let order = ws.order.clone();
    for &pid in order.iter().rev() {
        let alive = table.get(pid).is_some_and(ProcessRecord::is_alive);
        if !alive {
            continue;
        }
        evaluate(table, pass, ws, pid, UNKNOWN_ADJ, compute_clients, false);
        if let Some(record) = table.get_mut(pid) {
            retry |= record.state.contains_cycle;
            record.state.completed_seq = pass.seq;
        }
    }
    retry && compute_clients
}

/// Re-evaluate cycle members until no member improves
///
/// Scores only ever tighten across rounds, so the loop converges on the
/// finite lattice; the round cap bounds it regardless.
pub fn resolve_cycles(table: &mut ProcessTable, pass: &PassContext<'_>, ws: &mut WorkingSet) {
    let order = ws.order.clone();
    let in_cycle = |table: &ProcessTable, pid: Pid| {
        table
            .get(pid)
            .is_some_and(|r| r.is_alive() && r.state.contains_cycle)
    };

    let mut retry = true;
    while retry && ws.cycle_rounds < MAX_CYCLE_ROUNDS {
        ws.cycle_rounds += 1;
        retry = false;

        for &pid in &order {
            if !in_cycle(table, pid) {
                continue;
            }
            if let Some(record) = table.get_mut(pid) {
                record.state.adj_seq = record.state.adj_seq.saturating_sub(1);
                record.state.completed_seq = record.state.completed_seq.saturating_sub(1);
            }
        }

        for &pid in &order {
            if in_cycle(table, pid) && evaluate(table, pass, ws, pid, UNKNOWN_ADJ, true, true) {
                retry = true;
            }
        }
    }

    ws.converged = !retry;
    if retry {
        tracing::warn!(
            seq = pass.seq,
            rounds = ws.cycle_rounds,
            members = ws.in_cycle.len(),
            "Cycle resolution hit the round cap; committing best effort scores"
        );
    }
    ws.in_cycle.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::adjuster::config::QuotaConfig;
    use crate::process::core::types::ActivityState;
    use pretty_assertions::assert_eq;

    struct Harness {
        table: ProcessTable,
        globals: GlobalSignals,
        config: AdjusterConfig,
        seq: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                table: ProcessTable::new(),
                globals: GlobalSignals::default(),
                config: AdjusterConfig::new(
                    10,
                    QuotaConfig {
                        max_cached: 32,
                        max_empty: 16,
                    },
                    0.1,
                ),
                seq: 0,
            }
        }

        fn add(&mut self, pid: Pid) {
            self.table
                .add(ProcessRecord::new(pid, 10_000 + pid, "app"))
                .unwrap();
        }

        fn run(&mut self) {
            self.seq += 1;
            let pass = PassContext {
                seq: self.seq,
                now: 100_000,
                full: true,
                globals: &self.globals,
                config: &self.config,
                features: Features::empty(),
            };
            let order: Vec<Pid> = self.table.lru().to_vec();
            let mut ws = WorkingSet::new(order, true);
            prepare(&mut self.table, &ws, pass.seq);
            if evaluate_all(&mut self.table, &pass, &mut ws) {
                resolve_cycles(&mut self.table, &pass, &mut ws);
            }
        }

        fn score(&self, pid: Pid) -> Score {
            self.table.get(pid).unwrap().state.cur
        }
    }

    #[test]
    fn test_top_app() {
        let mut h = Harness::new();
        h.add(1);
        h.globals.top_app = Some(1);
        h.run();
        let score = h.score(1);
        assert_eq!(score.adj, FOREGROUND_APP_ADJ);
        assert_eq!(score.proc_state, ProcState::Top);
        assert_eq!(score.sched_group, SchedGroup::TopApp);
        assert_eq!(h.table.get(1).unwrap().state.completed_seq, h.seq);
    }

    #[test]
    fn test_unreferenced_process_stays_unknown() {
        let mut h = Harness::new();
        h.add(1);
        h.run();
        assert_eq!(h.score(1).adj, UNKNOWN_ADJ);
        assert_eq!(h.score(1).proc_state, ProcState::CachedEmpty);
    }

    #[test]
    fn test_client_score_flows_to_host() {
        let mut h = Harness::new();
        h.add(1);
        h.add(2);
        h.globals.top_app = Some(1);
        h.table.bind_service(1, 2, BindFlags::empty()).unwrap();
        h.run();
        let host = h.score(2);
        assert_eq!(host.adj, VISIBLE_APP_ADJ);
        assert_eq!(host.proc_state, ProcState::BoundTop);
        assert_eq!(h.table.get(2).unwrap().state.adj_type.as_str(), "service");
    }

    #[test]
    fn test_ceiling_clamps_final_adj() {
        let mut h = Harness::new();
        h.table
            .add(ProcessRecord::new(1, 1, "capped").with_max_adj(SERVICE_ADJ))
            .unwrap();
        h.run();
        let record = h.table.get(1).unwrap();
        assert_eq!(record.state.cur.adj, SERVICE_ADJ);
        assert_eq!(record.state.cur_raw_adj, UNKNOWN_ADJ);
    }

    #[test]
    fn test_fixed_process_with_visible_ui() {
        let mut h = Harness::new();
        let mut record = ProcessRecord::new(1, 1000, "system_ui").with_max_adj(PERSISTENT_PROC_ADJ);
        record.signals.activities = vec![ActivityState::Visible {
            window: Default::default(),
        }];
        h.table.add(record).unwrap();
        h.run();
        let score = h.score(1);
        assert_eq!(score.adj, PERSISTENT_PROC_ADJ);
        assert_eq!(score.proc_state, ProcState::PersistentUi);
        assert_eq!(score.sched_group, SchedGroup::TopApp);
        assert_eq!(score.capability, Capability::all());
    }

    #[test]
    fn test_dead_process() {
        let mut h = Harness::new();
        let mut record = ProcessRecord::new(1, 1, "gone");
        record.alive = false;
        h.table.add(record).unwrap();
        h.globals.top_app = Some(1);
        h.run();
        // Dead processes are skipped by the pass loop entirely
        assert_eq!(h.score(1), Score::UNKNOWN);
    }

    #[test]
    fn test_two_cycle_converges() {
        let mut h = Harness::new();
        h.add(1);
        h.add(2);
        if let Some(record) = h.table.get_mut(2) {
            record.signals.started_services = true;
            record.signals.keep_warming = true;
        }
        h.table.bind_service(1, 2, BindFlags::ABOVE_CLIENT).unwrap();
        h.table.bind_service(2, 1, BindFlags::empty()).unwrap();
        h.run();
        let raw = |h: &Harness, pid| h.table.get(pid).unwrap().state.cur_raw_adj;
        assert_eq!(raw(&h, 1), SERVICE_ADJ);
        assert_eq!(raw(&h, 2), SERVICE_ADJ);
        assert_eq!(h.score(2).adj, SERVICE_ADJ);
        // The above-client binder yields to its host
        assert_eq!(h.score(1).adj, CACHED_APP_MIN_ADJ);
        assert_eq!(h.score(1).proc_state, ProcState::Service);
        assert_eq!(h.score(2).proc_state, ProcState::Service);
    }

    #[test]
    fn test_modify_raw_adj_tiers() {
        assert_eq!(modify_raw_adj(PERSISTENT_PROC_ADJ), PERSISTENT_PROC_ADJ);
        assert_eq!(modify_raw_adj(FOREGROUND_APP_ADJ), VISIBLE_APP_ADJ);
        assert_eq!(modify_raw_adj(VISIBLE_APP_ADJ), PERCEPTIBLE_APP_ADJ);
        assert_eq!(modify_raw_adj(SERVICE_ADJ), CACHED_APP_MIN_ADJ);
        assert_eq!(modify_raw_adj(CACHED_APP_MIN_ADJ), CACHED_APP_MIN_ADJ + 1);
        assert_eq!(modify_raw_adj(UNKNOWN_ADJ), UNKNOWN_ADJ);
    }

    #[test]
    fn test_second_evaluation_in_same_pass_is_memoized() {
        let mut h = Harness::new();
        h.add(1);
        h.globals.top_app = Some(1);
        h.run();
        let pass = PassContext {
            seq: h.seq,
            now: 100_000,
            full: true,
            globals: &h.globals,
            config: &h.config,
            features: Features::empty(),
        };
        let mut ws = WorkingSet::new(vec![1], false);
        assert!(!evaluate(&mut h.table, &pass, &mut ws, 1, UNKNOWN_ADJ, true, false));
        assert!(ws.in_cycle.is_empty());
    }
}
