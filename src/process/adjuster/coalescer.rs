/*!
 * Update Coalescer
 *
 * Collects full and per-process update requests while a pass runs and
 * hands the worker one merged request at a time. Callers only take the
 * short internal lock; they never wait for a pass.
 */

use crate::core::types::Pid;
use ahash::RandomState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Why an update was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Activity,
    BindService,
    UnbindService,
    StartService,
    StopService,
    ExecutingService,
    GetProvider,
    RemoveProvider,
    Receiver,
    UiVisibility,
    ProcessBegin,
    ProcessEnd,
    Backup,
    FollowUp,
    SystemInit,
    Policy,
}

impl UpdateReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateReason::Activity => "activity",
            UpdateReason::BindService => "bind_service",
            UpdateReason::UnbindService => "unbind_service",
            UpdateReason::StartService => "start_service",
            UpdateReason::StopService => "stop_service",
            UpdateReason::ExecutingService => "executing_service",
            UpdateReason::GetProvider => "get_provider",
            UpdateReason::RemoveProvider => "remove_provider",
            UpdateReason::Receiver => "receiver",
            UpdateReason::UiVisibility => "ui_visibility",
            UpdateReason::ProcessBegin => "process_begin",
            UpdateReason::ProcessEnd => "process_end",
            UpdateReason::Backup => "backup",
            UpdateReason::FollowUp => "follow_up",
            UpdateReason::SystemInit => "system_init",
            UpdateReason::Policy => "policy",
        }
    }
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the single worker is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    RunningFull,
    RunningPartial,
}

/// A merged request for the next pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassRequest {
    Full { reason: UpdateReason },
    Partial { pids: Vec<Pid>, reason: UpdateReason },
}

impl PassRequest {
    pub fn reason(&self) -> UpdateReason {
        match self {
            PassRequest::Full { reason } | PassRequest::Partial { reason, .. } => *reason,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, PassRequest::Full { .. })
    }
}

#[derive(Debug)]
struct Pending {
    state: PassState,
    full: Option<UpdateReason>,
    reason: Option<UpdateReason>,
    /// Insertion order of the pending set
    order: Vec<Pid>,
    members: HashSet<Pid, RandomState>,
}

impl Pending {
    fn push(&mut self, pid: Pid) {
        if self.members.insert(pid) {
            self.order.push(pid);
        }
    }

    fn is_running(&self) -> bool {
        self.state != PassState::Idle
    }
}

/// Shared between request callers and the worker
#[derive(Debug)]
pub struct Coalescer {
    pending: Mutex<Pending>,
    notify: Notify,
    coalesced: AtomicU64,
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending {
                state: PassState::Idle,
                full: None,
                reason: None,
                order: Vec::new(),
                members: HashSet::default(),
            }),
            notify: Notify::new(),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PassState {
        self.pending.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().order.len()
    }

    pub fn is_pending(&self, pid: Pid) -> bool {
        self.pending.lock().members.contains(&pid)
    }

    pub fn full_requested(&self) -> bool {
        self.pending.lock().full.is_some()
    }

    /// Requests folded into a pass that was already running
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn note_running(&self, pending: &Pending) {
        if pending.is_running() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Ask for a full pass
    pub fn request_full(&self, reason: UpdateReason) {
        {
            let mut pending = self.pending.lock();
            self.note_running(&pending);
            pending.full.get_or_insert(reason);
        }
        self.notify.notify_one();
    }

    /// Ask for a pass over `pid` and whatever it reaches
    pub fn request(&self, pid: Pid, reason: UpdateReason) {
        {
            let mut pending = self.pending.lock();
            self.note_running(&pending);
            pending.push(pid);
            pending.reason.get_or_insert(reason);
        }
        self.notify.notify_one();
    }

    /// Add `pid` to the pending set without waking the worker
    pub fn enqueue(&self, pid: Pid) {
        self.pending.lock().push(pid);
    }

    /// Drop `pid` from the pending set
    pub fn remove(&self, pid: Pid) {
        let mut pending = self.pending.lock();
        if pending.members.remove(&pid) {
            pending.order.retain(|p| *p != pid);
        }
    }

    /// Wake the worker to drain whatever is pending
    pub fn kick(&self, reason: UpdateReason) {
        self.pending.lock().reason.get_or_insert(reason);
        self.notify.notify_one();
    }

    /// Tag whatever is pending with `reason` without waking anyone
    pub fn note_reason(&self, reason: UpdateReason) {
        self.pending.lock().reason.get_or_insert(reason);
    }

    /// Mark the running pass finished without taking more work
    pub fn finish(&self) {
        self.pending.lock().state = PassState::Idle;
    }

    /// Wait until a request or kick arrives
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Take the next merged request and mark the pass running
    ///
    /// Returns `None`, and goes idle, when nothing is pending. A pending
    /// full request absorbs every per-process request.
    pub fn next(&self) -> Option<PassRequest> {
        let mut pending = self.pending.lock();
        if let Some(reason) = pending.full.take() {
            pending.order.clear();
            pending.members.clear();
            pending.reason = None;
            pending.state = PassState::RunningFull;
            return Some(PassRequest::Full { reason });
        }
        if pending.order.is_empty() {
            pending.reason = None;
            pending.state = PassState::Idle;
            return None;
        }
        let pids = std::mem::take(&mut pending.order);
        pending.members.clear();
        let reason = pending.reason.take().unwrap_or(UpdateReason::Policy);
        pending.state = PassState::RunningPartial;
        Some(PassRequest::Partial { pids, reason })
    }
}
