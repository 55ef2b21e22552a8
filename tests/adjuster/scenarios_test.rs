/*!
 * Pass Scenarios
 * End-to-end passes over small hand-built process graphs
 */

use oom_adjuster::core::limits::*;
use oom_adjuster::core::ManualClock;
use oom_adjuster::process::adjuster::config::{FreezerConfig, QuotaConfig};
use oom_adjuster::process::adjuster::evaluator::modify_raw_adj;
use oom_adjuster::process::adjuster::{
    AdjusterConfig, Effect, GlobalSignals, OomAdjuster, UpdateReason,
};
use oom_adjuster::process::core::types::{
    ActivityState, BindFlags, Capability, KillReason, ProcState, SchedGroup, ThreadGroup,
    UnfreezeReason,
};
use oom_adjuster::process::{ProcessRecord, ProcessSignals};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn adjuster_with(config: AdjusterConfig) -> OomAdjuster {
    OomAdjuster::new(config, Arc::new(ManualClock::new(1_000))).unwrap()
}

fn adjuster(levels: i32, max_cached: usize, max_empty: usize) -> OomAdjuster {
    adjuster_with(AdjusterConfig::new(
        levels,
        QuotaConfig {
            max_cached,
            max_empty,
        },
        0.1,
    ))
}

fn stopped_activity() -> ProcessSignals {
    ProcessSignals {
        activities: vec![ActivityState::Stopped {
            perceptible_since: None,
        }],
        ..ProcessSignals::default()
    }
}

#[test]
fn test_simple_top_app() {
    let mut adj = adjuster(10, 32, 16);
    adj.add_process(ProcessRecord::new(1, 10_001, "launcher")).unwrap();
    adj.set_signals(GlobalSignals::default().with_top_app(1));

    let report = adj.update_all(UpdateReason::Activity);

    let set = adj.get(1).unwrap().state.set;
    assert_eq!(set.adj, FOREGROUND_APP_ADJ);
    assert_eq!(set.proc_state, ProcState::Top);
    assert_eq!(set.sched_group, SchedGroup::TopApp);
    assert!(report.effects.contains(&Effect::SchedulingClass {
        pid: 1,
        group: ThreadGroup::TopApp,
    }));
    assert!(report.kills.is_empty());
}

#[test]
fn test_two_cycle_without_signals_settles_in_cached_tier() {
    let mut adj = adjuster(10, 32, 16);
    adj.add_process(ProcessRecord::new(1, 10_001, "a")).unwrap();
    adj.add_process(ProcessRecord::new(2, 10_002, "b")).unwrap();
    adj.table_mut()
        .bind_service(1, 2, BindFlags::ABOVE_CLIENT)
        .unwrap();
    adj.table_mut().bind_service(2, 1, BindFlags::empty()).unwrap();

    let report = adj.update_all(UpdateReason::SystemInit);

    // Neither side can lift the other, so both land on the empty ladder by recency
    assert!(report.converged);
    let a = &adj.get(1).unwrap().state;
    let b = &adj.get(2).unwrap().state;
    assert_eq!(a.set.proc_state, ProcState::CachedEmpty);
    assert_eq!(b.set.proc_state, ProcState::CachedEmpty);
    assert!(a.set_raw_adj >= CACHED_APP_MIN_ADJ && a.set_raw_adj < UNKNOWN_ADJ);
    assert!(b.set_raw_adj >= CACHED_APP_MIN_ADJ && b.set_raw_adj < UNKNOWN_ADJ);
    assert!(b.set.adj <= a.set.adj);
    // The above-client binder sits one step past its raw slot
    assert_eq!(a.set.adj, modify_raw_adj(a.set_raw_adj));
    assert_eq!(b.set.adj, b.set_raw_adj);
    assert!(!a.contains_cycle && !b.contains_cycle);

    let first = (a.set, b.set);
    adj.update_all(UpdateReason::Policy);
    assert_eq!(first, (adj.get(1).unwrap().state.set, adj.get(2).unwrap().state.set));
}

#[test]
fn test_two_cycle_with_service_host_converges() {
    let mut adj = adjuster(10, 32, 16);
    adj.add_process(ProcessRecord::new(1, 10_001, "a")).unwrap();
    let mut b = ProcessRecord::new(2, 10_002, "b");
    b.signals.started_services = true;
    b.signals.keep_warming = true;
    adj.add_process(b).unwrap();
    adj.table_mut()
        .bind_service(1, 2, BindFlags::ABOVE_CLIENT)
        .unwrap();
    adj.table_mut().bind_service(2, 1, BindFlags::empty()).unwrap();

    let report = adj.update_all(UpdateReason::SystemInit);

    assert!(report.converged);
    let a = &adj.get(1).unwrap().state;
    let b = &adj.get(2).unwrap().state;
    assert_eq!(a.set_raw_adj, b.set_raw_adj);
    assert!(a.set_raw_adj < UNKNOWN_ADJ);
    assert!(a.set.adj <= CACHED_APP_MAX_ADJ && b.set.adj <= CACHED_APP_MAX_ADJ);
    assert!(!a.contains_cycle && !b.contains_cycle);
}

#[test]
fn test_cached_tiering_by_recency() {
    // Spacing 25 leaves two slots; ten cached processes fill them five at a time
    let mut adj = adjuster(25, 32, 16);
    for pid in 1..=10 {
        adj.add_process(ProcessRecord::new(pid, 10_000 + pid, "bg").with_signals(stopped_activity()))
            .unwrap();
    }

    adj.update_all(UpdateReason::SystemInit);

    let adj_of = |pid| adj.get(pid).unwrap().state.set.adj;
    for pid in 6..=10 {
        assert_eq!(adj_of(pid), CACHED_APP_MIN_ADJ, "pid {}", pid);
    }
    for pid in 1..=5 {
        assert_eq!(adj_of(pid), CACHED_APP_MIN_ADJ + 50, "pid {}", pid);
    }
    let lru = adj.table().lru();
    for pair in lru.windows(2) {
        assert!(adj_of(pair[0]) >= adj_of(pair[1]));
    }
}

#[test]
fn test_kill_quota_keeps_most_recent() {
    let mut adj = adjuster(10, 40, 10);
    for pid in 1..=20 {
        adj.add_process(ProcessRecord::new(pid, 10_000 + pid, "empty")).unwrap();
    }

    let report = adj.update_all(UpdateReason::Policy);

    let mut killed: Vec<u32> = report.kills.iter().map(|k| k.pid).collect();
    killed.sort_unstable();
    assert_eq!(killed, (1..=10).collect::<Vec<_>>());
    assert!(report
        .kills
        .iter()
        .all(|k| k.reason == KillReason::TooManyEmpty));
    for pid in 11..=20 {
        assert!(adj.get(pid).unwrap().is_alive());
    }
    let kill_effects = report
        .effects
        .iter()
        .filter(|e| matches!(e, Effect::Kill { .. }))
        .count();
    assert_eq!(kill_effects, 10);
}

#[test]
fn test_freeze_eligibility() {
    let config = AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: 32,
            max_empty: 16,
        },
        0.1,
    )
    .with_features(&["cpu_time_capability"])
    .with_freezer(FreezerConfig {
        enabled: true,
        cutoff_adj: CACHED_APP_MIN_ADJ,
    });
    let mut adj = adjuster_with(config);
    adj.add_process(ProcessRecord::new(1, 10_001, "top")).unwrap();
    adj.add_process(ProcessRecord::new(2, 10_002, "idle")).unwrap();
    adj.set_signals(GlobalSignals::default().with_top_app(1));

    let report = adj.update_all(UpdateReason::SystemInit);
    assert!(!report.effects.contains(&Effect::Freeze { pid: 1 }));
    assert!(report.effects.contains(&Effect::Freeze { pid: 2 }));
    assert!(adj.get(2).unwrap().freeze.is_frozen_or_pending());
    assert!(!adj.get(1).unwrap().freeze.is_frozen_or_pending());

    // Nothing changed: the freezer request is not repeated
    let report = adj.update_all(UpdateReason::Policy);
    assert!(!report.effects.contains(&Effect::Freeze { pid: 2 }));

    adj.table_mut().get_mut(2).unwrap().signals.cpu_time_allowlisted = true;
    let report = adj.update(2, UpdateReason::Policy);
    assert!(adj
        .get(2)
        .unwrap()
        .state
        .set
        .capability
        .contains(Capability::CPU_TIME));
    assert!(report.effects.contains(&Effect::Unfreeze {
        pid: 2,
        reason: UnfreezeReason::Capability,
    }));
    assert!(!adj.get(2).unwrap().freeze.is_frozen_or_pending());
}

#[test]
fn test_ceiling_applies_to_bound_host() {
    let mut adj = adjuster(10, 32, 16);
    adj.add_process(ProcessRecord::new(1, 10_001, "top")).unwrap();
    adj.add_process(ProcessRecord::new(2, 10_002, "capped").with_max_adj(SERVICE_ADJ))
        .unwrap();
    adj.table_mut().bind_service(1, 2, BindFlags::empty()).unwrap();
    adj.set_signals(GlobalSignals::default().with_top_app(1));
    adj.update_all(UpdateReason::SystemInit);
    assert!(adj.get(2).unwrap().state.set.adj <= SERVICE_ADJ);

    adj.set_signals(GlobalSignals::default());
    adj.update_all(UpdateReason::Activity);
    assert_eq!(adj.get(2).unwrap().state.set.adj, SERVICE_ADJ);
}

#[test]
fn test_uid_aggregate_reported_and_gone() {
    let mut adj = adjuster(10, 32, 16);
    adj.add_process(ProcessRecord::new(1, 10_050, "main")).unwrap();
    adj.add_process(ProcessRecord::new(2, 10_050, "remote")).unwrap();
    adj.set_signals(GlobalSignals::default().with_top_app(2));

    let report = adj.update_all(UpdateReason::SystemInit);
    assert_eq!(report.uid_changes.len(), 1);
    assert_eq!(report.uid_changes[0].proc_state, ProcState::Top);
    assert_eq!(adj.uid(10_050).unwrap().min_adj, FOREGROUND_APP_ADJ);

    adj.remove_process(1);
    adj.remove_process(2);
    let report = adj.update_all(UpdateReason::ProcessEnd);
    assert_eq!(report.uid_changes.len(), 1);
    assert!(adj.uid(10_050).is_none());
}
