/*!
 * Pass Benchmarks
 *
 * Full and partial passes over random binding graphs of a few hundred processes
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oom_adjuster::core::ManualClock;
use oom_adjuster::process::adjuster::config::QuotaConfig;
use oom_adjuster::process::adjuster::{AdjusterConfig, GlobalSignals, OomAdjuster, UpdateReason};
use oom_adjuster::process::core::types::{ActivityState, BindFlags};
use oom_adjuster::process::ProcessRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn build(processes: u32, edges_per_process: u32) -> OomAdjuster {
    let config = AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: processes as usize,
            max_empty: processes as usize / 2,
        },
        0.1,
    )
    .with_features(&["cpu_time_capability"]);
    let mut adj = OomAdjuster::new(config, Arc::new(ManualClock::new(10_000))).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    for pid in 1..=processes {
        let mut record = ProcessRecord::new(pid, 10_000 + pid % 50, "app");
        record.signals.started_services = rng.gen_bool(0.2);
        if rng.gen_bool(0.3) {
            record.signals.activities = vec![ActivityState::Stopped {
                perceptible_since: None,
            }];
        }
        adj.add_process(record).unwrap();
    }
    for client in 1..=processes {
        for _ in 0..edges_per_process {
            let host = rng.gen_range(1..=processes);
            if host == client {
                continue;
            }
            let flags = if rng.gen_bool(0.1) {
                BindFlags::ABOVE_CLIENT
            } else {
                BindFlags::empty()
            };
            adj.table_mut().bind_service(client, host, flags).unwrap();
        }
    }
    adj.set_signals(GlobalSignals::default().with_top_app(processes));
    adj
}

fn bench_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    for processes in [100u32, 300, 600] {
        let mut adj = build(processes, 2);
        group.bench_with_input(BenchmarkId::from_parameter(processes), &processes, |b, _| {
            b.iter(|| black_box(adj.update_all(UpdateReason::Policy)));
        });
    }
    group.finish();
}

fn bench_partial_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_pass");
    let mut adj = build(300, 2);
    adj.update_all(UpdateReason::SystemInit);
    group.bench_function("single_seed", |b| {
        b.iter(|| black_box(adj.update(150, UpdateReason::BindService)));
    });
    group.finish();
}

criterion_group!(benches, bench_full_pass, bench_partial_pass);
criterion_main!(benches);
