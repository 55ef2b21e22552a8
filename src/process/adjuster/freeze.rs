/*!
 * Freeze Policy
 * Pure decision over a committed score; requests are idempotent
 */

use super::config::FreezerConfig;
use crate::process::core::types::{Capability, UnfreezeReason};
use crate::process::record::ProcessRecord;
use serde::{Deserialize, Serialize};

/// Transition the freezer should make for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "reason", rename_all = "snake_case")]
pub enum FreezeAction {
    Freeze,
    Unfreeze(UnfreezeReason),
}

/// Whether the committed state allows freezing the process
///
/// With the CPU-time capability model the capability alone decides;
/// otherwise any should-not-freeze reason keeps the process running.
#[must_use]
pub fn should_freeze(record: &ProcessRecord, freezer: &FreezerConfig, cpu_time: bool) -> bool {
    if !freezer.enabled || record.signals.freeze_exempt {
        return false;
    }
    let held = if cpu_time {
        record.state.cur.capability.contains(Capability::CPU_TIME)
    } else {
        !record.state.should_not_freeze.is_empty()
    };
    !held && record.state.cur.adj >= freezer.cutoff_adj
}

/// Why a frozen process may no longer stay frozen
fn unfreeze_reason(record: &ProcessRecord, freezer: &FreezerConfig, cpu_time: bool) -> UnfreezeReason {
    if record.signals.freeze_exempt {
        UnfreezeReason::Exempt
    } else if record.state.cur.adj < freezer.cutoff_adj {
        UnfreezeReason::AdjRaised
    } else if cpu_time {
        UnfreezeReason::Capability
    } else {
        UnfreezeReason::ShouldNotFreeze
    }
}

/// Decide and record the freezer transition for `record`
///
/// Returns `None` when the process is already where it should be. A
/// disabled freezer leaves existing freeze state alone.
pub fn update_freeze_state(
    record: &mut ProcessRecord,
    freezer: &FreezerConfig,
    cpu_time: bool,
) -> Option<FreezeAction> {
    if !freezer.enabled {
        return None;
    }
    let target = should_freeze(record, freezer, cpu_time);
    let current = record.freeze.is_frozen_or_pending();
    match (target, current) {
        (true, false) => {
            record.freeze.pending_freeze = true;
            Some(FreezeAction::Freeze)
        }
        (false, true) => {
            let reason = unfreeze_reason(record, freezer, cpu_time);
            record.freeze.frozen = false;
            record.freeze.pending_freeze = false;
            Some(FreezeAction::Unfreeze(reason))
        }
        _ => None,
    }
}
