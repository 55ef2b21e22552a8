/*!
 * Service-B Demotion
 *
 * After a full pass, plain service processes beyond the most recent third
 * of the service population drop to the service-B adj. Under memory
 * pressure a large service is demoted regardless of its position.
 */

use super::config::ServiceBConfig;
use super::signals::GlobalSignals;
use crate::core::limits::{SERVICE_ADJ, SERVICE_B_ADJ};
use crate::core::types::Pid;
use crate::process::table::ProcessTable;

/// Assign service-B flags for processes completed in pass `seq`
///
/// Returns the number of service processes seen.
pub fn assign_service_b(
    table: &mut ProcessTable,
    config: &ServiceBConfig,
    globals: &GlobalSignals,
    seq: u64,
) -> usize {
    let services: Vec<Pid> = table
        .lru()
        .iter()
        .rev()
        .copied()
        .filter(|pid| {
            table.get(*pid).is_some_and(|r| {
                r.is_alive() && r.state.completed_seq == seq && r.state.cur.adj == SERVICE_ADJ
            })
        })
        .collect();
    let total = services.len();
    let pressured = !globals.memory_level.is_normal();

    let mut kept = 0usize;
    for pid in services {
        let Some(record) = table.get_mut(pid) else {
            continue;
        };
        let state = &mut record.state;
        state.service_b = kept > total / 3;
        if state.service_b {
            state.service_high_ram = false;
        } else {
            let heavy = config
                .high_ram_threshold_kb
                .is_some_and(|threshold| record.signals.last_pss_kb >= threshold);
            if pressured && heavy {
                state.service_high_ram = true;
                state.service_b = true;
            } else {
                state.service_high_ram = false;
                kept += 1;
            }
        }

        if state.service_b {
            let adj = SERVICE_B_ADJ.min(record.max_adj);
            state.cur_raw_adj = SERVICE_B_ADJ;
            state.cur.adj = adj;
            state.adj_type = "service-b".into();
        }
    }
    total
}
