/*!
 * Global Signals
 * Device-wide inputs read once per pass
 */

use crate::core::types::Pid;
use crate::process::core::types::ProcState;
use serde::{Deserialize, Serialize};

/// Last reported memory pressure
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLevel {
    #[default]
    Normal,
    Moderate,
    Low,
    Critical,
}

impl MemoryLevel {
    #[inline(always)]
    pub const fn is_normal(self) -> bool {
        matches!(self, MemoryLevel::Normal)
    }
}

/// Snapshot of the signals published outside the process graph
///
/// Swapped atomically by the owner; a pass reads exactly one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSignals {
    pub top_app: Option<Pid>,
    pub awake: bool,
    pub backup_target: Option<Pid>,
    pub memory_level: MemoryLevel,
    /// Fraction of swap still free, when the platform reports it
    pub free_swap: Option<f64>,
}

impl Default for GlobalSignals {
    fn default() -> Self {
        Self {
            top_app: None,
            awake: true,
            backup_target: None,
            memory_level: MemoryLevel::Normal,
            free_swap: None,
        }
    }
}

impl GlobalSignals {
    /// State granted to the top app; it sleeps with the device
    #[inline]
    pub const fn top_state(&self) -> ProcState {
        if self.awake {
            ProcState::Top
        } else {
            ProcState::TopSleeping
        }
    }

    #[inline]
    pub fn is_top(&self, pid: Pid) -> bool {
        self.top_app == Some(pid)
    }

    #[inline]
    pub fn is_backup_target(&self, pid: Pid) -> bool {
        self.backup_target == Some(pid)
    }

    #[must_use]
    pub fn with_top_app(mut self, pid: Pid) -> Self {
        self.top_app = Some(pid);
        self
    }
}
