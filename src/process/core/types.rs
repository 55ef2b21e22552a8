/*!
 * Process Types
 * Ordered state enums, flag sets and the score tuple
 */

use crate::core::limits::UNKNOWN_ADJ;
use crate::core::types::Adj;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle/activity category of a process
///
/// Ordered: lower is more important. Combinators take `min()`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcState {
    Persistent = 0,
    PersistentUi,
    Top,
    BoundTop,
    ForegroundService,
    BoundForegroundService,
    ImportantForeground,
    ImportantBackground,
    TransientBackground,
    Backup,
    Service,
    Receiver,
    TopSleeping,
    HeavyWeight,
    Home,
    LastActivity,
    CachedActivity,
    CachedActivityClient,
    CachedRecent,
    CachedEmpty,
    #[default]
    Nonexistent,
}

impl ProcState {
    /// Cached states may be killed freely by the trim policy
    #[inline(always)]
    #[must_use]
    pub const fn is_cached(self) -> bool {
        self as u8 >= ProcState::CachedActivity as u8
    }

    /// Background states no longer justify foreground resources
    #[inline(always)]
    #[must_use]
    pub const fn is_background(self) -> bool {
        self as u8 >= ProcState::TransientBackground as u8
    }

    /// Whether the uid aggregate counts this state as cached
    #[inline(always)]
    #[must_use]
    pub const fn is_uid_cached(self) -> bool {
        self as u8 > ProcState::Receiver as u8
    }

    /// Memory accounting buckets; states in the same bucket share a PSS schedule
    #[must_use]
    pub const fn memory_class(self) -> u8 {
        match self {
            ProcState::Persistent | ProcState::PersistentUi => 0,
            ProcState::Top | ProcState::BoundTop => 1,
            ProcState::ForegroundService
            | ProcState::BoundForegroundService
            | ProcState::ImportantForeground => 2,
            ProcState::ImportantBackground
            | ProcState::TransientBackground
            | ProcState::Backup
            | ProcState::Service
            | ProcState::Receiver
            | ProcState::TopSleeping
            | ProcState::HeavyWeight => 3,
            ProcState::Home | ProcState::LastActivity => 4,
            ProcState::Nonexistent => 6,
            _ => 5,
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Coarse OS scheduling class
///
/// Ordered: higher gets more preferential CPU treatment. Combinators take `max()`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedGroup {
    #[default]
    Background = 0,
    Restricted,
    Default,
    ForegroundWindow,
    TopApp,
    TopAppBound,
}

impl SchedGroup {
    /// OS thread group the class maps to
    #[must_use]
    pub const fn thread_group(self) -> ThreadGroup {
        match self {
            SchedGroup::Background => ThreadGroup::Background,
            SchedGroup::Restricted => ThreadGroup::Restricted,
            SchedGroup::Default => ThreadGroup::Default,
            SchedGroup::ForegroundWindow => ThreadGroup::ForegroundWindow,
            SchedGroup::TopApp | SchedGroup::TopAppBound => ThreadGroup::TopApp,
        }
    }
}

/// OS-level thread group handed to the process controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadGroup {
    Background,
    Restricted,
    Default,
    ForegroundWindow,
    TopApp,
}

bitflags! {
    /// Permissions granted to a process, propagated along dependency edges
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capability: u32 {
        const LOCATION = 1 << 0;
        const CAMERA = 1 << 1;
        const MICROPHONE = 1 << 2;
        const POWER_RESTRICTED_NETWORK = 1 << 3;
        /// Background activity start
        const BFSL = 1 << 4;
        const USER_RESTRICTED_NETWORK = 1 << 5;
        const FOREGROUND_AUDIO_CONTROL = 1 << 6;
        /// Allowed to run; the freezer leaves holders alone
        const CPU_TIME = 1 << 7;
        /// Implicit while-in-use access for instrumented processes
        const IMPLICIT = 1 << 8;

        const NETWORK = Self::POWER_RESTRICTED_NETWORK.bits() | Self::USER_RESTRICTED_NETWORK.bits();
        const FOREGROUND_SERVICE_TYPES =
            Self::LOCATION.bits() | Self::CAMERA.bits() | Self::MICROPHONE.bits();
    }
}

bitflags! {
    /// Flags carried by a service binding, selecting its transfer rule
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BindFlags: u32 {
        const WAIVE_PRIORITY = 1 << 0;
        const ABOVE_CLIENT = 1 << 1;
        const IMPORTANT = 1 << 2;
        const NOT_FOREGROUND = 1 << 3;
        const IMPORTANT_BACKGROUND = 1 << 4;
        const NOT_PERCEPTIBLE = 1 << 5;
        const ALMOST_PERCEPTIBLE = 1 << 6;
        const NOT_VISIBLE = 1 << 7;
        const TREAT_LIKE_VISIBLE_FOREGROUND_SERVICE = 1 << 8;
        const TREAT_LIKE_ACTIVITY = 1 << 9;
        const ADJUST_WITH_ACTIVITY = 1 << 10;
        const INCLUDE_CAPABILITIES = 1 << 11;
        const BYPASS_POWER_NETWORK_RESTRICTIONS = 1 << 12;
        const BYPASS_USER_NETWORK_RESTRICTIONS = 1 << 13;
        const ALLOW_OOM_MANAGEMENT = 1 << 14;
        const FOREGROUND_SERVICE = 1 << 15;
        const FOREGROUND_SERVICE_WHILE_AWAKE = 1 << 16;
        const SCHEDULE_LIKE_TOP_APP = 1 << 17;
        /// The host may be frozen even while the client runs; blocks CPU-time propagation
        const ALLOW_FREEZE = 1 << 18;
    }
}

bitflags! {
    /// Reasons a process must stay unfrozen even at a freezable adj
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShouldNotFreeze: u32 {
        const BINDER_ALLOW_OOM_MANAGEMENT = 1 << 0;
        const BIND_WAIVE_PRIORITY = 1 << 1;
        const CLIENT_UNFROZEN = 1 << 2;
    }
}

/// Kind of foreground service a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundServiceKind {
    Regular,
    /// Time-limited service without the background-start capability
    Short,
}

/// Window mode of a visible activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    #[default]
    Fullscreen,
    SplitOrFreeform,
    MultiWindow,
}

/// State of one hosted activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivityState {
    Visible {
        #[serde(default)]
        window: WindowMode,
    },
    Paused,
    Stopping {
        finishing: bool,
    },
    /// Stopped; `perceptible_since` marks a perceptible task stop time
    Stopped {
        perceptible_since: Option<u64>,
    },
}

/// Reason a process was killed by the trim policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    TooManyCached,
    TooManyEmpty,
    EmptyTooLong,
    IsolatedNotNeeded,
    SandboxNotNeeded,
    ProactiveLowSwap,
}

impl KillReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            KillReason::TooManyCached => "too many cached",
            KillReason::TooManyEmpty => "too many empty",
            KillReason::EmptyTooLong => "empty for too long",
            KillReason::IsolatedNotNeeded => "isolated not needed",
            KillReason::SandboxNotNeeded => "sandbox not needed",
            KillReason::ProactiveLowSwap => "low swap",
        }
    }
}

/// Reason a frozen process is thawed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnfreezeReason {
    /// Adj rose above the freezer cutoff
    AdjRaised,
    /// Gained the CPU-time capability
    Capability,
    /// A should-not-freeze reason appeared
    ShouldNotFreeze,
    /// Became freeze-exempt
    Exempt,
}

/// The score tuple computed for each process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub adj: Adj,
    pub proc_state: ProcState,
    pub capability: Capability,
    pub sched_group: SchedGroup,
}

impl Score {
    /// The state of a process before its first evaluation
    pub const UNKNOWN: Score = Score {
        adj: UNKNOWN_ADJ,
        proc_state: ProcState::Nonexistent,
        capability: Capability::empty(),
        sched_group: SchedGroup::Background,
    };

    #[inline]
    #[must_use]
    pub const fn new(adj: Adj, proc_state: ProcState, sched_group: SchedGroup) -> Self {
        Self {
            adj,
            proc_state,
            capability: Capability::empty(),
            sched_group,
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Whether `self` is at least as important as `other` on both ordered axes
    #[inline]
    #[must_use]
    pub fn dominates(&self, other: &Score) -> bool {
        self.adj <= other.adj && self.proc_state <= other.proc_state
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "adj={} state={} group={:?} cap={:#x}",
            self.adj,
            self.proc_state,
            self.sched_group,
            self.capability.bits()
        )
    }
}

/// Capabilities a process holds by virtue of its state alone
#[must_use]
pub fn default_capability_for(state: ProcState, has_instrumentation: bool) -> Capability {
    let mut cap = match state {
        ProcState::Persistent | ProcState::PersistentUi | ProcState::Top => Capability::all(),
        ProcState::BoundTop => {
            if has_instrumentation {
                Capability::BFSL | Capability::IMPLICIT
            } else {
                Capability::BFSL
            }
        }
        ProcState::ForegroundService if has_instrumentation => Capability::IMPLICIT,
        _ => Capability::empty(),
    };
    match state {
        ProcState::Persistent
        | ProcState::PersistentUi
        | ProcState::Top
        | ProcState::BoundTop
        | ProcState::ForegroundService
        | ProcState::BoundForegroundService => cap |= Capability::NETWORK,
        ProcState::ImportantForeground | ProcState::ImportantBackground => {
            cap |= Capability::USER_RESTRICTED_NETWORK
        }
        _ => {}
    }
    cap
}
