/*!
 * OOM Adjuster Library
 * Process-importance scheduling exposed as a library
 */

pub mod core;
pub mod monitoring;
pub mod process;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::{Clock, ManualClock, MonotonicClock};
pub use monitoring::init_tracing;
pub use process::adjuster::{
    AdjusterConfig, AdjusterTask, Effect, Features, GlobalSignals, OomAdjuster, PassReport,
    ProcessController, UpdateReason,
};
pub use process::{ProcessRecord, ProcessTable};
