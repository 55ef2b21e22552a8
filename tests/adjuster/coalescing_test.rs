/*!
 * Coalescing Tests
 * Concurrent requests, the pending set and connection dry runs
 */

use oom_adjuster::core::limits::*;
use oom_adjuster::core::ManualClock;
use oom_adjuster::process::adjuster::config::QuotaConfig;
use oom_adjuster::process::adjuster::{
    AdjusterConfig, GlobalSignals, OomAdjuster, PassRequest, PassState, UpdateReason,
};
use oom_adjuster::process::core::types::BindFlags;
use oom_adjuster::process::ProcessRecord;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

fn adjuster(processes: u32) -> OomAdjuster {
    let config = AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: 64,
            max_empty: 32,
        },
        0.1,
    );
    let mut adj = OomAdjuster::new(config, Arc::new(ManualClock::new(1_000))).unwrap();
    for pid in 1..=processes {
        adj.add_process(ProcessRecord::new(pid, 10_000 + pid, "app")).unwrap();
    }
    adj
}

#[test]
fn test_requests_during_full_pass_schedule_one_more() {
    let mut adj = adjuster(8);
    let coalescer = adj.coalescer();
    coalescer.request_full(UpdateReason::SystemInit);

    let running = coalescer.next().unwrap();
    assert!(running.is_full());
    assert_eq!(coalescer.state(), PassState::RunningFull);

    let handles: Vec<_> = (1..=8)
        .map(|pid| {
            let coalescer = Arc::clone(&coalescer);
            thread::spawn(move || coalescer.request(pid, UpdateReason::Activity))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    adj.run(running);

    let reports = adj.drain();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].full);
    assert_eq!(reports[0].evaluated, 8);
    assert_eq!(coalescer.state(), PassState::Idle);
    assert_eq!(adj.stats().coalesced_requests, 8);
}

#[test]
fn test_full_request_absorbs_partials() {
    let mut adj = adjuster(3);
    let coalescer = adj.coalescer();
    coalescer.request(1, UpdateReason::Activity);
    coalescer.request_full(UpdateReason::Policy);
    coalescer.request(2, UpdateReason::Activity);

    let reports = adj.drain();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].full);
    assert_eq!(reports[0].reason, Some(UpdateReason::Policy));
}

#[test]
fn test_enqueue_then_update_pending() {
    let mut adj = adjuster(4);
    adj.enqueue(1);
    adj.enqueue(3);
    adj.enqueue(3);
    adj.remove_from_pending(1);

    let report = adj.update_pending(UpdateReason::Receiver).unwrap();
    assert_eq!(report.reason, Some(UpdateReason::Receiver));
    assert_eq!(report.evaluated, 1);
    assert!(adj.update_pending(UpdateReason::Receiver).is_none());
}

#[test]
fn test_bind_to_idle_client_is_skipped() {
    let mut adj = adjuster(2);
    if let Some(host) = adj.table_mut().get_mut(2) {
        host.signals.started_services = true;
    }
    adj.update_all(UpdateReason::SystemInit);

    // A cached client cannot lift a service host
    let id = adj.table_mut().bind_service(1, 2, BindFlags::empty()).unwrap();
    assert!(!adj.on_service_bound(id));
    assert_eq!(adj.coalescer().pending_len(), 0);
}

#[test]
fn test_bind_from_top_enqueues_host() {
    let mut adj = adjuster(2);
    adj.set_signals(GlobalSignals::default().with_top_app(1));
    adj.update_all(UpdateReason::SystemInit);

    let id = adj.table_mut().bind_service(1, 2, BindFlags::empty()).unwrap();
    assert!(adj.on_service_bound(id));
    assert!(adj.coalescer().is_pending(2));

    let report = adj.update_pending(UpdateReason::BindService).unwrap();
    assert!(report.changed(2));
    assert!(adj.get(2).unwrap().state.set.adj <= VISIBLE_APP_ADJ);
}

#[test]
fn test_provider_from_top_enqueues_host() {
    let mut adj = adjuster(2);
    adj.set_signals(GlobalSignals::default().with_top_app(1));
    adj.update_all(UpdateReason::SystemInit);

    let id = adj.table_mut().connect_provider(1, 2).unwrap();
    assert!(adj.on_provider_connected(id));
    adj.update_pending(UpdateReason::GetProvider).unwrap();
    assert_eq!(adj.get(2).unwrap().state.set.adj, FOREGROUND_APP_ADJ);

    assert!(adj.disconnect_provider(id).unwrap());
    adj.update_pending(UpdateReason::RemoveProvider).unwrap();
    assert!(adj.get(2).unwrap().state.set.adj >= CACHED_APP_MIN_ADJ);
}

#[test]
fn test_dry_run_on_sandboxed_host_always_passes() {
    let mut adj = adjuster(1);
    let mut sandbox = ProcessRecord::new(9, 90_009, "sandbox").attributed_to(1);
    sandbox.signals.sdk_sandbox = true;
    adj.add_process(sandbox).unwrap();
    adj.update_all(UpdateReason::SystemInit);

    let id = adj.table_mut().bind_service(1, 9, BindFlags::empty()).unwrap();
    assert!(adj.evaluate_service_connection_add(id));
}

#[test]
fn test_partial_request_shape() {
    let adj = adjuster(2);
    let coalescer = adj.coalescer();
    coalescer.request(2, UpdateReason::StartService);
    coalescer.request(1, UpdateReason::StopService);
    assert_eq!(
        coalescer.next(),
        Some(PassRequest::Partial {
            pids: vec![2, 1],
            reason: UpdateReason::StartService,
        })
    );
}
