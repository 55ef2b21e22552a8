/*!
 * Dependency Edges
 * Service bindings and provider connections between processes
 */

use super::core::types::{BindFlags, ProcState};
use crate::core::types::{ConnectionId, Pid, Timestamp};
use serde::{Deserialize, Serialize};

/// A service binding: `client` depends on a service hosted by `host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConnection {
    pub id: ConnectionId,
    pub client: Pid,
    pub host: Pid,
    pub flags: BindFlags,
    /// For sandbox hosts, the app the binding is made on behalf of
    pub attributed_client: Option<Pid>,
    /// The client activity this binding follows is visible
    pub activity_visible: bool,
    /// Last time the bound service did work
    pub service_last_activity: Timestamp,
    /// Edge-local state, refreshed each time the edge raises its host
    pub tracked_proc_state: ProcState,
}

impl ServiceConnection {
    #[inline]
    #[must_use]
    pub fn new(id: ConnectionId, client: Pid, host: Pid, flags: BindFlags) -> Self {
        Self {
            id,
            client,
            host,
            flags,
            attributed_client: None,
            activity_visible: false,
            service_last_activity: 0,
            tracked_proc_state: ProcState::Nonexistent,
        }
    }

    /// Client whose score is transferred to the host
    #[inline(always)]
    #[must_use]
    pub fn effective_client(&self) -> Pid {
        self.attributed_client.unwrap_or(self.client)
    }

    #[inline(always)]
    #[must_use]
    pub fn has_flag(&self, flag: BindFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// A provider connection: `client` reads data published by `host`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: ConnectionId,
    pub client: Pid,
    pub host: Pid,
}
