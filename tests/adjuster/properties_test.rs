/*!
 * Pass Properties
 * Randomized graphs checked against the ceiling, idempotence and cycle rules
 */

use oom_adjuster::core::limits::*;
use oom_adjuster::core::types::{Adj, Pid};
use oom_adjuster::core::ManualClock;
use oom_adjuster::process::adjuster::config::QuotaConfig;
use oom_adjuster::process::adjuster::evaluator::{
    evaluate_all, prepare, resolve_cycles, PassContext, WorkingSet,
};
use oom_adjuster::process::adjuster::{
    AdjusterConfig, Features, GlobalSignals, OomAdjuster, UpdateReason,
};
use oom_adjuster::process::core::types::{ActivityState, BindFlags, Score};
use oom_adjuster::process::{ProcessRecord, ProcessTable};
use proptest::prelude::*;
use std::sync::Arc;

const CEILINGS: [Adj; 5] = [
    UNKNOWN_ADJ,
    UNKNOWN_ADJ,
    SERVICE_ADJ,
    PERCEPTIBLE_APP_ADJ,
    PERSISTENT_PROC_ADJ,
];

const FLAGS: [BindFlags; 5] = [
    BindFlags::empty(),
    BindFlags::ABOVE_CLIENT,
    BindFlags::WAIVE_PRIORITY,
    BindFlags::NOT_FOREGROUND,
    BindFlags::IMPORTANT,
];

#[derive(Debug, Clone)]
struct Graph {
    processes: Vec<(usize, bool, bool)>,
    edges: Vec<(usize, usize, usize)>,
    top: Option<usize>,
}

fn graph() -> impl Strategy<Value = Graph> {
    (2usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec((0..CEILINGS.len(), any::<bool>(), any::<bool>()), n),
            prop::collection::vec((0..n, 0..n, 0..FLAGS.len()), 0..n * 2),
            prop::option::of(0..n),
        )
            .prop_map(|(processes, edges, top)| Graph {
                processes,
                edges,
                top,
            })
    })
}

fn config() -> AdjusterConfig {
    AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: 64,
            max_empty: 32,
        },
        0.1,
    )
}

fn pid(index: usize) -> Pid {
    index as Pid + 1
}

fn populate(table: &mut ProcessTable, graph: &Graph) {
    for (i, (ceiling, services, stopped)) in graph.processes.iter().enumerate() {
        let mut record = ProcessRecord::new(pid(i), 10_000 + pid(i), "app").with_max_adj(CEILINGS[*ceiling]);
        record.signals.started_services = *services;
        if *stopped {
            record.signals.activities = vec![ActivityState::Stopped {
                perceptible_since: None,
            }];
        }
        table.add(record).unwrap();
    }
    for (client, host, flags) in &graph.edges {
        if client != host {
            table
                .bind_service(pid(*client), pid(*host), FLAGS[*flags])
                .unwrap();
        }
    }
}

fn signals(graph: &Graph) -> GlobalSignals {
    match graph.top {
        Some(top) => GlobalSignals::default().with_top_app(pid(top)),
        None => GlobalSignals::default(),
    }
}

fn adjuster(graph: &Graph) -> OomAdjuster {
    let mut adj = OomAdjuster::new(config(), Arc::new(ManualClock::new(5_000))).unwrap();
    populate(adj.table_mut(), graph);
    adj.set_signals(signals(graph));
    adj
}

fn scores(adj: &OomAdjuster) -> Vec<Score> {
    adj.table().iter().map(|r| r.state.set).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ceiling_respected(graph in graph()) {
        let mut adj = adjuster(&graph);
        adj.update_all(UpdateReason::SystemInit);
        for record in adj.table().iter() {
            prop_assert!(
                record.state.set.adj <= record.max_adj,
                "pid {} adj {} over ceiling {}",
                record.pid,
                record.state.set.adj,
                record.max_adj
            );
        }
    }

    #[test]
    fn prop_full_pass_idempotent(graph in graph()) {
        let mut adj = adjuster(&graph);
        adj.update_all(UpdateReason::SystemInit);
        let first = scores(&adj);
        let report = adj.update_all(UpdateReason::Policy);
        prop_assert_eq!(first, scores(&adj));
        prop_assert!(report.score_changes().is_empty());
    }

    #[test]
    fn prop_cycle_rounds_only_tighten(graph in graph()) {
        let mut table = ProcessTable::new();
        populate(&mut table, &graph);
        let globals = signals(&graph);
        let config = config();
        let pass = PassContext {
            seq: 1,
            now: 5_000,
            full: true,
            globals: &globals,
            config: &config,
            features: Features::empty(),
        };
        let mut ws = WorkingSet::new(table.lru().to_vec(), true);
        prepare(&mut table, &ws, pass.seq);
        if evaluate_all(&mut table, &pass, &mut ws) {
            let before: Vec<(Pid, Score)> = table.iter().map(|r| (r.pid, r.state.cur)).collect();
            resolve_cycles(&mut table, &pass, &mut ws);
            prop_assert!(ws.cycle_rounds <= MAX_CYCLE_ROUNDS);
            for (pid, old) in before {
                let new = table.get(pid).unwrap().state.cur;
                prop_assert!(new.adj <= old.adj, "pid {} adj {} -> {}", pid, old.adj, new.adj);
                prop_assert!(new.proc_state <= old.proc_state);
            }
        }
    }
}
