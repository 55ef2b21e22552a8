/*!
 * Process Table
 * Registry of processes, their dependency edges and the LRU order
 */

use super::connection::{ProviderConnection, ServiceConnection};
use super::core::types::BindFlags;
use super::record::ProcessRecord;
use crate::core::errors::GraphError;
use crate::core::types::{ConnectionId, Pid};
use ahash::RandomState;
use log::debug;
use std::collections::HashMap;

/// Processes and edges owned by the component layer
///
/// The adjuster reads the graph during a pass and writes only score,
/// freeze and edge bookkeeping fields.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: HashMap<Pid, ProcessRecord, RandomState>,
    services: HashMap<ConnectionId, ServiceConnection, RandomState>,
    providers: HashMap<ConnectionId, ProviderConnection, RandomState>,
    /// Sandbox processes keyed by the app they run for
    sandboxes: HashMap<Pid, Vec<Pid>, RandomState>,
    /// Least recently used first
    lru: Vec<Pid>,
    next_connection_id: ConnectionId,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Attach a process; it becomes the most recently used
    pub fn add(&mut self, record: ProcessRecord) -> Result<(), GraphError> {
        let pid = record.pid;
        if self.procs.contains_key(&pid) {
            return Err(GraphError::DuplicateProcess(pid));
        }
        if let Some(owner) = record.attributed_to {
            self.sandboxes.entry(owner).or_default().push(pid);
        }
        self.procs.insert(pid, record);
        self.lru.push(pid);
        debug!("Attached process {}", pid);
        Ok(())
    }

    /// Detach a process and drop every edge touching it
    pub fn remove(&mut self, pid: Pid) -> Option<ProcessRecord> {
        let record = self.procs.remove(&pid)?;
        for id in record.bindings_in.iter().chain(record.bindings_out.iter()) {
            if let Some(conn) = self.services.remove(id) {
                self.detach_service_ids(&conn);
            }
        }
        for id in record.providers_in.iter().chain(record.providers_out.iter()) {
            if let Some(conn) = self.providers.remove(id) {
                self.detach_provider_ids(&conn);
            }
        }
        if let Some(owner) = record.attributed_to {
            if let Some(list) = self.sandboxes.get_mut(&owner) {
                list.retain(|p| *p != pid);
            }
        }
        self.sandboxes.remove(&pid);
        self.lru.retain(|p| *p != pid);
        debug!("Detached process {}", pid);
        Some(record)
    }

    #[inline]
    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.procs.get(&pid)
    }

    #[inline]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessRecord> {
        self.procs.get_mut(&pid)
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.procs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessRecord> {
        self.procs.values_mut()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.procs.keys().copied().collect()
    }

    /// Bind `client` to a service hosted by `host`
    pub fn bind_service(
        &mut self,
        client: Pid,
        host: Pid,
        flags: BindFlags,
    ) -> Result<ConnectionId, GraphError> {
        self.insert_service(|id| ServiceConnection::new(id, client, host, flags))
    }

    /// Insert a fully described binding; its id is assigned here
    pub fn insert_service(
        &mut self,
        build: impl FnOnce(ConnectionId) -> ServiceConnection,
    ) -> Result<ConnectionId, GraphError> {
        let id = self.next_id();
        let conn = build(id);
        if !self.procs.contains_key(&conn.client) {
            return Err(GraphError::ProcessNotFound(conn.client));
        }
        if !self.procs.contains_key(&conn.host) {
            return Err(GraphError::ProcessNotFound(conn.host));
        }
        if let Some(rec) = self.procs.get_mut(&conn.client) {
            rec.bindings_out.push(id);
        }
        if let Some(rec) = self.procs.get_mut(&conn.host) {
            rec.bindings_in.push(id);
        }
        self.services.insert(id, conn);
        Ok(id)
    }

    pub fn unbind_service(&mut self, id: ConnectionId) -> Result<ServiceConnection, GraphError> {
        let conn = self
            .services
            .remove(&id)
            .ok_or(GraphError::ConnectionNotFound(id))?;
        self.detach_service_ids(&conn);
        Ok(conn)
    }

    pub fn connect_provider(&mut self, client: Pid, host: Pid) -> Result<ConnectionId, GraphError> {
        if !self.procs.contains_key(&client) {
            return Err(GraphError::ProcessNotFound(client));
        }
        if !self.procs.contains_key(&host) {
            return Err(GraphError::ProcessNotFound(host));
        }
        let id = self.next_id();
        if let Some(rec) = self.procs.get_mut(&client) {
            rec.providers_out.push(id);
        }
        if let Some(rec) = self.procs.get_mut(&host) {
            rec.providers_in.push(id);
        }
        self.providers.insert(id, ProviderConnection { id, client, host });
        Ok(id)
    }

    pub fn disconnect_provider(
        &mut self,
        id: ConnectionId,
    ) -> Result<ProviderConnection, GraphError> {
        let conn = self
            .providers
            .remove(&id)
            .ok_or(GraphError::ConnectionNotFound(id))?;
        self.detach_provider_ids(&conn);
        Ok(conn)
    }

    #[inline]
    pub fn service(&self, id: ConnectionId) -> Option<&ServiceConnection> {
        self.services.get(&id)
    }

    #[inline]
    pub fn service_mut(&mut self, id: ConnectionId) -> Option<&mut ServiceConnection> {
        self.services.get_mut(&id)
    }

    #[inline]
    pub fn provider(&self, id: ConnectionId) -> Option<&ProviderConnection> {
        self.providers.get(&id)
    }

    /// Live clients of `host` over either edge kind
    pub fn clients_of(&self, host: Pid) -> Vec<Pid> {
        let Some(rec) = self.procs.get(&host) else {
            return Vec::new();
        };
        let services = rec
            .bindings_in
            .iter()
            .filter_map(|id| self.services.get(id))
            .map(ServiceConnection::effective_client);
        let providers = rec
            .providers_in
            .iter()
            .filter_map(|id| self.providers.get(id))
            .map(|c| c.client);
        let mut out: Vec<Pid> = services.chain(providers).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Hosts `client` depends on over either edge kind
    pub fn hosts_of(&self, client: Pid) -> Vec<Pid> {
        let Some(rec) = self.procs.get(&client) else {
            return Vec::new();
        };
        let services = rec
            .bindings_out
            .iter()
            .filter_map(|id| self.services.get(id))
            .map(|c| c.host);
        let providers = rec
            .providers_out
            .iter()
            .filter_map(|id| self.providers.get(id))
            .map(|c| c.host);
        let mut out: Vec<Pid> = services.chain(providers).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Sandbox processes running on behalf of `owner`
    pub fn sandboxes_of(&self, owner: Pid) -> &[Pid] {
        self.sandboxes.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mark `pid` as the most recently used process
    pub fn touch_lru(&mut self, pid: Pid) {
        if let Some(pos) = self.lru.iter().position(|p| *p == pid) {
            self.lru.remove(pos);
            self.lru.push(pid);
        }
    }

    /// Least recently used first
    #[inline]
    pub fn lru(&self) -> &[Pid] {
        &self.lru
    }

    fn next_id(&mut self) -> ConnectionId {
        self.next_connection_id += 1;
        self.next_connection_id
    }

    fn detach_service_ids(&mut self, conn: &ServiceConnection) {
        if let Some(rec) = self.procs.get_mut(&conn.client) {
            rec.bindings_out.retain(|c| *c != conn.id);
        }
        if let Some(rec) = self.procs.get_mut(&conn.host) {
            rec.bindings_in.retain(|c| *c != conn.id);
        }
    }

    fn detach_provider_ids(&mut self, conn: &ProviderConnection) {
        if let Some(rec) = self.procs.get_mut(&conn.client) {
            rec.providers_out.retain(|c| *c != conn.id);
        }
        if let Some(rec) = self.procs.get_mut(&conn.host) {
            rec.providers_in.retain(|c| *c != conn.id);
        }
    }
}
