/*!
 * Outbound Effects
 *
 * Side effects a pass produces, and the controller seam that carries them
 * to the OS. Effects are queued on a flume channel and delivered by a
 * dispatcher task, so a pass never waits on the controller.
 */

use crate::core::errors::ControllerError;
use crate::core::types::{Pid, Uid};
use crate::process::core::types::{KillReason, Score, ThreadGroup, UnfreezeReason};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One committed score transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub pid: Pid,
    pub uid: Uid,
    pub old: Score,
    pub new: Score,
}

/// A side effect requested by a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Batched score notification, one per pass
    Scores { changes: Vec<ScoreChange> },
    SchedulingClass { pid: Pid, group: ThreadGroup },
    Kill { pid: Pid, reason: KillReason },
    Freeze { pid: Pid },
    Unfreeze { pid: Pid, reason: UnfreezeReason },
}

impl Effect {
    /// Target process, if the effect concerns a single one
    pub fn pid(&self) -> Option<Pid> {
        match self {
            Effect::Scores { .. } => None,
            Effect::SchedulingClass { pid, .. }
            | Effect::Kill { pid, .. }
            | Effect::Freeze { pid }
            | Effect::Unfreeze { pid, .. } => Some(*pid),
        }
    }
}

/// OS-facing primitives the adjuster drives
///
/// Implementations must not block for long; they run on the dispatcher
/// task. Failures are logged and dropped.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessController: Send + Sync {
    fn on_scores_changed(&self, changes: &[ScoreChange]) -> Result<(), ControllerError>;

    fn request_kill(&self, pid: Pid, reason: KillReason) -> Result<(), ControllerError>;

    fn request_freeze(&self, pid: Pid) -> Result<(), ControllerError>;

    fn request_unfreeze(&self, pid: Pid, reason: UnfreezeReason) -> Result<(), ControllerError>;

    fn set_scheduling_class(&self, pid: Pid, group: ThreadGroup) -> Result<(), ControllerError>;
}

/// Deliver one effect, logging a failure instead of returning it
pub fn dispatch(controller: &dyn ProcessController, effect: &Effect) {
    let result = match effect {
        Effect::Scores { changes } => controller.on_scores_changed(changes),
        Effect::SchedulingClass { pid, group } => controller.set_scheduling_class(*pid, *group),
        Effect::Kill { pid, reason } => controller.request_kill(*pid, *reason),
        Effect::Freeze { pid } => controller.request_freeze(*pid),
        Effect::Unfreeze { pid, reason } => controller.request_unfreeze(*pid, *reason),
    };
    if let Err(e) = result {
        match effect.pid() {
            Some(pid) => warn!("Controller rejected effect for pid {}: {}", pid, e),
            None => warn!("Controller rejected score batch: {}", e),
        }
    }
}

/// Sending half handed to the adjuster
pub type EffectSender = flume::Sender<Effect>;

/// Spawn the dispatcher; it exits once every sender is dropped
pub fn spawn_dispatcher(
    controller: Arc<dyn ProcessController>,
) -> (EffectSender, tokio::task::JoinHandle<()>) {
    let (tx, rx) = flume::unbounded::<Effect>();
    let handle = tokio::spawn(async move {
        while let Ok(effect) = rx.recv_async().await {
            dispatch(controller.as_ref(), &effect);
        }
        debug!("Effect dispatcher drained");
    });
    (tx, handle)
}

/// Queue a batch of effects; a closed channel only logs
pub fn publish(tx: &EffectSender, effects: impl IntoIterator<Item = Effect>) {
    for effect in effects {
        if tx.send(effect).is_err() {
            warn!("Effect dispatcher is gone; dropping effects");
            return;
        }
    }
}
