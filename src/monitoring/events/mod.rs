/*!
 * Adjuster Events
 * Serializable record of the effects each pass produced
 */

use crate::core::types::{Adj, Pid, Timestamp};
use crate::process::adjuster::outbound::Effect;
use crate::process::core::types::{KillReason, ProcState, ThreadGroup, UnfreezeReason};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};

/// Event severity for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
}

/// What happened to a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjEventKind {
    ScoreChanged {
        from_adj: Adj,
        to_adj: Adj,
        from_state: ProcState,
        to_state: ProcState,
    },
    SchedulingClass {
        group: ThreadGroup,
    },
    Killed {
        reason: KillReason,
    },
    Frozen,
    Unfrozen {
        reason: UnfreezeReason,
    },
}

/// One outbound effect, timestamped with the pass that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjEvent {
    pub timestamp: Timestamp,
    pub seq: u64,
    pub pid: Pid,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: AdjEventKind,
}

impl AdjEvent {
    pub fn new(timestamp: Timestamp, seq: u64, pid: Pid, kind: AdjEventKind) -> Self {
        let severity = match kind {
            AdjEventKind::Killed { .. } => Severity::Warn,
            AdjEventKind::Frozen | AdjEventKind::Unfrozen { .. } => Severity::Info,
            AdjEventKind::ScoreChanged { .. } => Severity::Debug,
            AdjEventKind::SchedulingClass { .. } => Severity::Trace,
        };
        Self {
            timestamp,
            seq,
            pid,
            severity,
            kind,
        }
    }

    /// Expand an effect into per-process events
    pub fn from_effect(timestamp: Timestamp, seq: u64, effect: &Effect) -> Vec<AdjEvent> {
        match effect {
            Effect::Scores { changes } => changes
                .iter()
                .map(|c| {
                    AdjEvent::new(
                        timestamp,
                        seq,
                        c.pid,
                        AdjEventKind::ScoreChanged {
                            from_adj: c.old.adj,
                            to_adj: c.new.adj,
                            from_state: c.old.proc_state,
                            to_state: c.new.proc_state,
                        },
                    )
                })
                .collect(),
            Effect::SchedulingClass { pid, group } => vec![AdjEvent::new(
                timestamp,
                seq,
                *pid,
                AdjEventKind::SchedulingClass { group: *group },
            )],
            Effect::Kill { pid, reason } => vec![AdjEvent::new(
                timestamp,
                seq,
                *pid,
                AdjEventKind::Killed { reason: *reason },
            )],
            Effect::Freeze { pid } => vec![AdjEvent::new(timestamp, seq, *pid, AdjEventKind::Frozen)],
            Effect::Unfreeze { pid, reason } => vec![AdjEvent::new(
                timestamp,
                seq,
                *pid,
                AdjEventKind::Unfrozen { reason: *reason },
            )],
        }
    }
}

/// Bounded history of recent events; the oldest are overwritten
pub struct EventHistory {
    buffer: Mutex<HeapRb<AdjEvent>>,
    min_severity: Severity,
}

impl std::fmt::Debug for EventHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHistory")
            .field("len", &self.len())
            .field("min_severity", &self.min_severity)
            .finish()
    }
}

impl EventHistory {
    pub fn new(capacity: usize, min_severity: Severity) -> Self {
        Self {
            buffer: Mutex::new(HeapRb::new(capacity.max(1))),
            min_severity,
        }
    }

    pub fn record(&self, event: AdjEvent) {
        if event.severity < self.min_severity {
            return;
        }
        self.buffer.lock().push_overwrite(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = AdjEvent>) {
        let mut buffer = self.buffer.lock();
        for event in events.into_iter().filter(|e| e.severity >= self.min_severity) {
            buffer.push_overwrite(event);
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest first
    pub fn recent(&self) -> Vec<AdjEvent> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Events concerning one process, oldest first
    pub fn for_pid(&self, pid: Pid) -> Vec<AdjEvent> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| e.pid == pid)
            .cloned()
            .collect()
    }
}
