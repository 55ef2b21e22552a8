/*!
 * Adjuster Task Tests
 * Worker loop, follow-up wakes and effect dispatch end to end
 */

use oom_adjuster::core::errors::ControllerError;
use oom_adjuster::core::limits::*;
use oom_adjuster::core::types::Pid;
use oom_adjuster::core::{Clock, MonotonicClock};
use oom_adjuster::process::adjuster::config::{QuotaConfig, TimingConfig};
use oom_adjuster::process::adjuster::outbound::spawn_dispatcher;
use oom_adjuster::process::adjuster::{
    AdjusterConfig, AdjusterTask, GlobalSignals, OomAdjuster, PassReport, ProcessController,
    ScoreChange, UpdateReason,
};
use oom_adjuster::process::core::types::{ActivityState, KillReason, ThreadGroup, UnfreezeReason};
use oom_adjuster::process::ProcessRecord;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

/// Controller that records what it was asked to do
#[derive(Default)]
struct Recorder {
    scores: Mutex<Vec<ScoreChange>>,
    kills: Mutex<Vec<Pid>>,
    classes: Mutex<Vec<(Pid, ThreadGroup)>>,
    freezes: Mutex<Vec<Pid>>,
}

impl ProcessController for Recorder {
    fn on_scores_changed(&self, changes: &[ScoreChange]) -> Result<(), ControllerError> {
        self.scores.lock().extend_from_slice(changes);
        Ok(())
    }

    fn request_kill(&self, pid: Pid, _reason: KillReason) -> Result<(), ControllerError> {
        self.kills.lock().push(pid);
        Ok(())
    }

    fn request_freeze(&self, pid: Pid) -> Result<(), ControllerError> {
        self.freezes.lock().push(pid);
        Ok(())
    }

    fn request_unfreeze(&self, pid: Pid, _reason: UnfreezeReason) -> Result<(), ControllerError> {
        Err(ControllerError::PermissionDenied(pid))
    }

    fn set_scheduling_class(&self, pid: Pid, group: ThreadGroup) -> Result<(), ControllerError> {
        self.classes.lock().push((pid, group));
        Ok(())
    }
}

fn adjuster(processes: u32, max_empty: usize) -> OomAdjuster {
    let config = AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: max_empty * 2,
            max_empty,
        },
        0.1,
    );
    let mut adj = OomAdjuster::new(config, Arc::new(MonotonicClock::new())).unwrap();
    for pid in 1..=processes {
        adj.add_process(ProcessRecord::new(pid, 10_000 + pid, "app")).unwrap();
    }
    adj
}

async fn next_report(rx: &flume::Receiver<PassReport>) -> PassReport {
    tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
        .await
        .expect("pass did not finish")
        .expect("report channel closed")
}

#[tokio::test]
async fn test_effects_reach_controller() {
    let recorder = Arc::new(Recorder::default());
    let (tx, dispatcher) = spawn_dispatcher(recorder.clone());
    let adj = adjuster(6, 4).with_effect_sender(tx);

    let task = AdjusterTask::spawn(adj);
    let reports = task.reports();
    task.publish_signals(GlobalSignals::default().with_top_app(6))
        .unwrap();
    let report = next_report(&reports).await;
    assert!(report.full);
    assert_eq!(report.kills.len(), 1);

    task.shutdown().await;
    dispatcher.await.unwrap();

    // The killed process is never committed
    assert_eq!(recorder.scores.lock().len(), 5);
    assert_eq!(*recorder.kills.lock(), vec![1]);
    assert!(recorder.classes.lock().contains(&(6, ThreadGroup::TopApp)));
    assert!(!recorder.freezes.lock().is_empty());
}

#[tokio::test]
async fn test_many_callers_do_not_block() {
    let task = Arc::new(AdjusterTask::spawn(adjuster(16, 16)));
    let reports = task.reports();

    let callers: Vec<_> = (1..=16)
        .map(|pid| {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.request_update(pid, UpdateReason::Activity) })
        })
        .collect();
    futures::future::join_all(callers).await;

    let mut evaluated = 0;
    while evaluated < 16 {
        evaluated += next_report(&reports).await.evaluated;
    }
    assert_eq!(evaluated, 16);

    let task = Arc::try_unwrap(task).ok().expect("task still shared");
    task.shutdown().await;
}

#[tokio::test]
async fn test_follow_up_wakes_worker() {
    let config = AdjusterConfig::new(
        10,
        QuotaConfig {
            max_cached: 8,
            max_empty: 4,
        },
        0.1,
    )
    .with_timing(TimingConfig {
        perceptible_task_timeout: Duration::from_millis(50),
        follow_up_wait: Duration::ZERO,
        ..Default::default()
    });
    let clock = Arc::new(MonotonicClock::new());
    let mut adj = OomAdjuster::new(config, clock.clone()).unwrap();
    let mut record = ProcessRecord::new(1, 10_001, "stopped");
    record.signals.activities = vec![ActivityState::Stopped {
        perceptible_since: Some(clock.now()),
    }];
    adj.add_process(record).unwrap();
    adj.update_all(UpdateReason::SystemInit);
    assert_eq!(adj.get(1).unwrap().state.set.adj, PERCEPTIBLE_MEDIUM_APP_ADJ);
    assert!(adj.next_follow_up().is_some());

    let task = AdjusterTask::spawn(adj);
    let reports = task.reports();
    let report = next_report(&reports).await;
    assert_eq!(report.reason, Some(UpdateReason::FollowUp));
    assert!(task.adjuster().lock().get(1).unwrap().state.set.adj > PERCEPTIBLE_MEDIUM_APP_ADJ);
    task.shutdown().await;
}
