/*!
 * Reachability
 * Breadth-first walk from a seed set to every host it depends on
 */

use crate::core::limits::{FOREGROUND_APP_ADJ, SYSTEM_ADJ};
use crate::core::types::Pid;
use crate::process::core::types::BindFlags;
use crate::process::table::ProcessTable;
use ahash::RandomState;
use std::collections::{HashSet, VecDeque};

/// Processes a partial pass must evaluate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachable {
    /// Discovery order reversed; the pass walks it from the back
    pub order: Vec<Pid>,
    pub has_cycle: bool,
}

impl Reachable {
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Hosts pinned between system and foreground are never re-scored
#[inline]
fn is_pinned(max_adj: i32) -> bool {
    (SYSTEM_ADJ..FOREGROUND_APP_ADJ).contains(&max_adj)
}

/// Mark `pid` discovered; returns true if it was already seen
fn visit(
    visited: &mut HashSet<Pid, RandomState>,
    pid: Pid,
    queue: &mut VecDeque<Pid>,
    discovered: &mut Vec<Pid>,
) -> bool {
    if visited.insert(pid) {
        discovered.push(pid);
        queue.push_back(pid);
        false
    } else {
        true
    }
}

/// Collect every process reachable from `seeds` over outbound edges
pub fn collect(table: &ProcessTable, seeds: &[Pid]) -> Reachable {
    let mut visited: HashSet<Pid, RandomState> = HashSet::default();
    let mut discovered = Vec::with_capacity(seeds.len());
    let mut queue = VecDeque::with_capacity(seeds.len());
    let mut has_cycle = false;

    for &pid in seeds {
        if table.contains(pid) && visited.insert(pid) {
            discovered.push(pid);
            queue.push_back(pid);
        }
    }

    while let Some(pid) = queue.pop_front() {
        let Some(record) = table.get(pid) else {
            continue;
        };

        for conn in record
            .outbound_services()
            .iter()
            .filter_map(|id| table.service(*id))
        {
            let Some(host) = table.get(conn.host) else {
                continue;
            };
            if host.pid == pid || is_pinned(host.max_adj) {
                continue;
            }
            if visited.contains(&host.pid) {
                has_cycle = true;
                continue;
            }
            if conn.has_flag(BindFlags::WAIVE_PRIORITY)
                && !conn
                    .flags
                    .intersects(BindFlags::TREAT_LIKE_ACTIVITY | BindFlags::ADJUST_WITH_ACTIVITY)
            {
                continue;
            }
            visit(&mut visited, host.pid, &mut queue, &mut discovered);
        }

        for conn in record
            .outbound_providers()
            .iter()
            .filter_map(|id| table.provider(*id))
        {
            let Some(host) = table.get(conn.host) else {
                continue;
            };
            if host.pid == pid || is_pinned(host.max_adj) {
                continue;
            }
            has_cycle |= visit(&mut visited, host.pid, &mut queue, &mut discovered);
        }

        for &sandbox in table.sandboxes_of(pid) {
            if table.contains(sandbox) {
                has_cycle |= visit(&mut visited, sandbox, &mut queue, &mut discovered);
            }
        }

        if record.signals.sdk_sandbox {
            // A sandbox reaches back to the apps it serves
            for conn in record
                .inbound_services()
                .iter()
                .filter_map(|id| table.service(*id))
            {
                let Some(owner) = conn.attributed_client else {
                    continue;
                };
                if owner != pid && table.contains(owner) {
                    has_cycle |= visit(&mut visited, owner, &mut queue, &mut discovered);
                }
            }
        }
    }

    discovered.reverse();
    Reachable {
        order: discovered,
        has_cycle,
    }
}
