/*!
 * OOM Adjuster
 *
 * Recomputes importance scores for every process from its own signals and
 * from the processes that depend on it, then ranks the cached tier, trims
 * over-quota processes, drives the freezer and publishes the changes.
 *
 * A pass is synchronous and single-writer: the adjuster owns the process
 * table for its duration. Requests that arrive meanwhile are merged by the
 * [`Coalescer`] and served by the next pass.
 */

pub mod apply;
pub mod atomic_stats;
pub mod coalescer;
pub mod config;
pub mod evaluator;
pub mod follow_up;
pub mod freeze;
pub mod lru;
pub mod outbound;
pub mod reachability;
pub mod rules;
pub mod service_b;
pub mod signals;
pub mod task;
pub mod transfer;
pub mod trim;
pub mod uid;

pub use atomic_stats::{AdjusterStats, AtomicAdjusterStats};
pub use coalescer::{Coalescer, PassRequest, PassState, UpdateReason};
pub use config::{AdjusterConfig, Features};
pub use outbound::{Effect, ProcessController, ScoreChange};
pub use signals::{GlobalSignals, MemoryLevel};
pub use task::AdjusterTask;
pub use trim::KillDecision;
pub use uid::{UidChange, UidChangeRecord, UidTracker};

use crate::core::clock::Clock;
use crate::core::errors::Result;
use crate::core::limits::EVENT_HISTORY_CAPACITY;
use crate::core::serde::{is_default, is_empty_vec};
use crate::core::types::{ConnectionId, Pid, Timestamp, Uid};
use crate::monitoring::metrics::names;
use crate::monitoring::{AdjEvent, EventHistory, MetricsCollector, PassSpan, Severity, Timer};
use crate::process::connection::{ProviderConnection, ServiceConnection};
use crate::process::core::types::{BindFlags, Capability};
use crate::process::record::ProcessRecord;
use crate::process::table::ProcessTable;
use ahash::RandomState;
use arc_swap::ArcSwap;
use evaluator::{PassContext, WorkingSet};
use follow_up::FollowUps;
use freeze::FreezeAction;
use outbound::EffectSender;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use transfer::{ClientView, HostView, TransferEnv};
use trim::{TrimCounts, TrimPolicy};

/// Result of one pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassReport {
    pub seq: u64,
    pub full: bool,
    pub reason: Option<UpdateReason>,
    pub trace_id: String,
    pub now: Timestamp,
    /// Processes in the working set
    pub evaluated: usize,
    pub cycle_rounds: u32,
    pub converged: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub counts: TrimCounts,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub kills: Vec<KillDecision>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub effects: Vec<Effect>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub events: Vec<AdjEvent>,
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub uid_changes: Vec<UidChangeRecord>,
}

impl PassReport {
    /// Score changes committed by the pass
    pub fn score_changes(&self) -> &[ScoreChange] {
        self.effects
            .iter()
            .find_map(|e| match e {
                Effect::Scores { changes } => Some(changes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn changed(&self, pid: Pid) -> bool {
        self.score_changes().iter().any(|c| c.pid == pid)
    }
}

/// The process-importance scheduler
pub struct OomAdjuster {
    config: AdjusterConfig,
    features: Features,
    clock: Arc<dyn Clock>,
    table: ProcessTable,
    signals: Arc<ArcSwap<GlobalSignals>>,
    seq: u64,
    coalescer: Arc<Coalescer>,
    follow_ups: FollowUps,
    trim: TrimPolicy,
    uids: UidTracker,
    stats: Arc<AtomicAdjusterStats>,
    metrics: Arc<MetricsCollector>,
    events: Arc<EventHistory>,
    effects: Option<EffectSender>,
}

impl std::fmt::Debug for OomAdjuster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OomAdjuster")
            .field("seq", &self.seq)
            .field("processes", &self.table.len())
            .field("features", &self.features)
            .field("pending", &self.coalescer.pending_len())
            .finish()
    }
}

impl OomAdjuster {
    /// Build an adjuster; the configuration is validated first
    pub fn new(config: AdjusterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let features = config.feature_set()?;
        let started_at = clock.now();
        info!(features = ?features, "OOM adjuster created");
        Ok(Self {
            config,
            features,
            clock,
            table: ProcessTable::new(),
            signals: Arc::new(ArcSwap::from_pointee(GlobalSignals::default())),
            seq: 0,
            coalescer: Arc::new(Coalescer::new()),
            follow_ups: FollowUps::new(),
            trim: TrimPolicy::new(started_at),
            uids: UidTracker::new(),
            stats: Arc::new(AtomicAdjusterStats::new()),
            metrics: Arc::new(MetricsCollector::new()),
            events: Arc::new(EventHistory::new(EVENT_HISTORY_CAPACITY, Severity::Debug)),
            effects: None,
        })
    }

    /// Route effects to a dispatcher instead of only reporting them
    pub fn with_effect_sender(mut self, sender: EffectSender) -> Self {
        self.effects = Some(sender);
        self
    }

    pub fn set_effect_sender(&mut self, sender: EffectSender) {
        self.effects = Some(sender);
    }

    pub fn config(&self) -> &AdjusterConfig {
        &self.config
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Mutable graph access for the component layer between passes
    pub fn table_mut(&mut self) -> &mut ProcessTable {
        &mut self.table
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.table.get(pid)
    }

    /// Shared handle to the published global signals
    pub fn signals(&self) -> Arc<ArcSwap<GlobalSignals>> {
        Arc::clone(&self.signals)
    }

    pub fn set_signals(&self, signals: GlobalSignals) {
        self.signals.store(Arc::new(signals));
    }

    pub fn coalescer(&self) -> Arc<Coalescer> {
        Arc::clone(&self.coalescer)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn stats(&self) -> AdjusterStats {
        self.stats.set_coalesced(self.coalescer.coalesced());
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<AtomicAdjusterStats> {
        Arc::clone(&self.stats)
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn events(&self) -> Arc<EventHistory> {
        Arc::clone(&self.events)
    }

    pub fn uid(&self, uid: Uid) -> Option<&uid::UidRecord> {
        self.uids.get(uid)
    }

    /// Attach a process; it becomes the most recently used
    pub fn add_process(&mut self, record: ProcessRecord) -> Result<()> {
        self.table.add(record)?;
        Ok(())
    }

    /// Detach a process and drop every bit of scheduling state for it
    pub fn remove_process(&mut self, pid: Pid) -> Option<ProcessRecord> {
        self.follow_ups.forget(pid);
        self.coalescer.remove(pid);
        self.table.remove(pid)
    }

    /// Run a full pass over every process
    pub fn update_all(&mut self, reason: UpdateReason) -> PassReport {
        self.run(PassRequest::Full { reason })
    }

    /// Run a partial pass over `pid` and everything it reaches
    pub fn update(&mut self, pid: Pid, reason: UpdateReason) -> PassReport {
        self.run(PassRequest::Partial {
            pids: vec![pid],
            reason,
        })
    }

    /// Add `pid` to the pending set without running a pass
    pub fn enqueue(&self, pid: Pid) {
        self.coalescer.enqueue(pid);
    }

    pub fn remove_from_pending(&self, pid: Pid) {
        self.coalescer.remove(pid);
    }

    /// Run one pass over whatever is pending, if anything
    pub fn update_pending(&mut self, reason: UpdateReason) -> Option<PassReport> {
        self.coalescer.note_reason(reason);
        let request = self.coalescer.next()?;
        let report = self.run(request);
        self.coalescer.finish();
        Some(report)
    }

    /// Serve merged requests until nothing is pending
    pub fn drain(&mut self) -> Vec<PassReport> {
        let mut reports = Vec::new();
        while let Some(request) = self.coalescer.next() {
            reports.push(self.run(request));
        }
        reports
    }

    /// Earliest pending follow-up
    pub fn next_follow_up(&self) -> Option<Timestamp> {
        self.follow_ups.next_wake()
    }

    /// Move every process whose temporary floor has expired into the pending
    /// set and serve it together with anything already waiting
    pub fn process_follow_ups(&mut self) -> Option<PassReport> {
        let now = self.clock.now();
        let spacing = config::ms(self.config.timing.follow_up_wait);
        let expired: Vec<Pid> = self
            .follow_ups
            .take_expired(now, spacing)
            .into_iter()
            .filter(|pid| self.table.contains(*pid))
            .collect();
        if expired.is_empty() {
            return None;
        }
        self.stats.add_follow_ups(expired.len() as u64);
        debug!(count = expired.len(), "Follow-up re-evaluation");
        for pid in expired {
            self.coalescer.enqueue(pid);
        }
        self.update_pending(UpdateReason::FollowUp)
    }

    fn transfer_env(&self) -> (Arc<GlobalSignals>, Timestamp) {
        (self.signals.load_full(), self.clock.now())
    }

    /// Prelude shared by the connection fast paths: a missing, sandboxed or
    /// dead endpoint always needs a pass
    fn needs_pass_regardless(&self, client: Pid, host: Pid) -> bool {
        let (Some(_), Some(host)) = (self.table.get(client), self.table.get(host)) else {
            return true;
        };
        host.signals.sdk_sandbox || host.signals.isolated || !host.is_alive()
    }

    /// Whether a new binding could change its host's committed score
    pub fn evaluate_service_connection_add(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.table.service(id) else {
            return false;
        };
        let client = conn.effective_client();
        if self.needs_pass_regardless(client, conn.host) {
            return true;
        }
        let (Some(client), Some(host)) = (self.table.get(client), self.table.get(conn.host)) else {
            return true;
        };
        let (globals, now) = self.transfer_env();
        let env = TransferEnv {
            now,
            awake: globals.awake,
            timing: &self.config.timing,
            cycle_reeval: false,
            cpu_time: self.features.contains(Features::CPU_TIME_CAPABILITY),
        };
        transfer::service_would_change(&HostView::of(host), &ClientView::of(client, 0), conn, &env)
    }

    /// Whether removing a binding could lower its host's committed score
    pub fn evaluate_service_connection_removal(&self, conn: &ServiceConnection) -> bool {
        self.removal_matters(conn.effective_client(), conn.host, conn.flags)
    }

    pub fn evaluate_provider_connection_add(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.table.provider(id) else {
            return false;
        };
        if self.needs_pass_regardless(conn.client, conn.host) {
            return true;
        }
        let (Some(client), Some(host)) = (self.table.get(conn.client), self.table.get(conn.host))
        else {
            return true;
        };
        let (globals, now) = self.transfer_env();
        let env = TransferEnv {
            now,
            awake: globals.awake,
            timing: &self.config.timing,
            cycle_reeval: false,
            cpu_time: self.features.contains(Features::CPU_TIME_CAPABILITY),
        };
        transfer::provider_would_change(&HostView::of(host), &ClientView::of(client, 0), &env)
    }

    pub fn evaluate_provider_connection_removal(&self, conn: &ProviderConnection) -> bool {
        self.removal_matters(conn.client, conn.host, BindFlags::empty())
    }

    /// A removed edge matters unless the host beats its client on score and
    /// holds nothing it could only have received through that edge
    fn removal_matters(&self, client: Pid, host: Pid, flags: BindFlags) -> bool {
        if self.needs_pass_regardless(client, host) {
            return true;
        }
        let (Some(client), Some(host)) = (self.table.get(client), self.table.get(host)) else {
            return true;
        };
        let (client, host) = (&client.state, &host.state);
        if host.set.adj >= client.set.adj || host.set.proc_state >= client.set.proc_state {
            return true;
        }
        let shared = host.set.capability & client.set.capability;
        if flags.intersects(
            BindFlags::INCLUDE_CAPABILITIES | BindFlags::BYPASS_USER_NETWORK_RESTRICTIONS,
        ) && !shared.is_empty()
        {
            return true;
        }
        if flags.intersects(BindFlags::WAIVE_PRIORITY | BindFlags::ALLOW_OOM_MANAGEMENT) {
            return true;
        }
        if !host.should_not_freeze.is_empty() && !client.should_not_freeze.is_empty() {
            return true;
        }
        self.features.contains(Features::CPU_TIME_CAPABILITY)
            && shared.contains(Capability::CPU_TIME)
    }

    /// Enqueue the host of a new binding if the binding matters
    pub fn on_service_bound(&self, id: ConnectionId) -> bool {
        let needed = self.evaluate_service_connection_add(id);
        if let (true, Some(conn)) = (needed, self.table.service(id)) {
            self.coalescer.enqueue(conn.host);
        }
        needed
    }

    /// Remove a binding and enqueue its host if the removal matters
    pub fn unbind_service(&mut self, id: ConnectionId) -> Result<bool> {
        let needed = match self.table.service(id) {
            Some(conn) => self.evaluate_service_connection_removal(conn),
            None => false,
        };
        let conn = self.table.unbind_service(id)?;
        if needed {
            self.coalescer.enqueue(conn.host);
        }
        Ok(needed)
    }

    pub fn on_provider_connected(&self, id: ConnectionId) -> bool {
        let needed = self.evaluate_provider_connection_add(id);
        if let (true, Some(conn)) = (needed, self.table.provider(id)) {
            self.coalescer.enqueue(conn.host);
        }
        needed
    }

    pub fn disconnect_provider(&mut self, id: ConnectionId) -> Result<bool> {
        let needed = match self.table.provider(id) {
            Some(conn) => self.evaluate_provider_connection_removal(conn),
            None => false,
        };
        let conn = self.table.disconnect_provider(id)?;
        if needed {
            self.coalescer.enqueue(conn.host);
        }
        Ok(needed)
    }

    /// Run one pass for `request`
    pub fn run(&mut self, request: PassRequest) -> PassReport {
        self.seq += 1;
        let seq = self.seq;
        let now = self.clock.now();
        let globals = self.signals.load_full();
        let full = request.is_full();
        let reason = request.reason();

        let span = PassSpan::new(seq, full, reason.as_str());
        let _entered = span.enter();
        let _timer = Timer::start(&self.metrics, names::PASS_DURATION);

        let (order, potential_cycles) = match &request {
            PassRequest::Full { .. } => (self.table.lru().to_vec(), true),
            PassRequest::Partial { pids, .. } => {
                let reach = reachability::collect(&self.table, pids);
                (reach.order, reach.has_cycle)
            }
        };
        span.record_processes(order.len());

        let pass = PassContext {
            seq,
            now,
            full,
            globals: &globals,
            config: &self.config,
            features: self.features,
        };
        let mut ws = WorkingSet::new(order, potential_cycles);
        evaluator::prepare(&mut self.table, &ws, seq);
        if evaluator::evaluate_all(&mut self.table, &pass, &mut ws) {
            evaluator::resolve_cycles(&mut self.table, &pass, &mut ws);
        }
        span.record_cycle_rounds(ws.cycle_rounds);
        if ws.cycle_rounds > 0 {
            self.stats.add_cycle_rounds(u64::from(ws.cycle_rounds));
            self.metrics
                .inc_counter(names::CYCLE_ROUNDS_TOTAL, f64::from(ws.cycle_rounds));
        }
        if !ws.converged {
            self.stats.inc_unconverged();
        }

        if full {
            service_b::assign_service_b(&mut self.table, &self.config.service_b, &globals, seq);
        }

        lru::apply_lru_adjust(&mut self.table, &self.config, self.features, now);
        let kill_order = if self.features.contains(Features::RANK_BY_MEMORY) {
            lru::rerank_by_memory(&self.table)
        } else {
            self.table.lru().to_vec()
        };

        let (kills, counts) = self.trim.trim_in_order(
            &mut self.table,
            &kill_order,
            &self.config,
            self.features,
            now,
            globals.free_swap,
        );

        let mut effects = Vec::new();
        let mut changes = Vec::new();
        let cpu_time = self.features.contains(Features::CPU_TIME_CAPABILITY);
        let lru: Vec<Pid> = self.table.lru().to_vec();
        for pid in lru {
            let Some(record) = self.table.get_mut(pid) else {
                continue;
            };
            if !record.is_alive() || record.state.completed_seq != seq {
                continue;
            }
            let applied = apply::apply_process(record, &self.config.freezer, cpu_time, now);
            if let Some(change) = applied.score_change {
                changes.push(change);
            }
            match applied.freeze {
                Some(FreezeAction::Freeze) => {
                    self.stats.inc_freezes();
                    self.metrics.inc_counter(names::FREEZES_TOTAL, 1.0);
                }
                Some(FreezeAction::Unfreeze(_)) => {
                    self.stats.inc_unfreezes();
                    self.metrics.inc_counter(names::UNFREEZES_TOTAL, 1.0);
                }
                None => {}
            }
            effects.extend(applied.effects(pid));
        }
        if !changes.is_empty() {
            effects.insert(0, Effect::Scores { changes });
        }
        effects.extend(kills.iter().map(|k| Effect::Kill {
            pid: k.pid,
            reason: k.reason,
        }));
        if !kills.is_empty() {
            self.stats.add_kills(kills.len() as u64);
            self.metrics
                .inc_counter(names::KILLS_TOTAL, kills.len() as f64);
            for kill in &kills {
                self.follow_ups.forget(kill.pid);
                info!(pid = kill.pid, reason = kill.reason.as_str(), "Killing process");
            }
        }

        for pid in &ws.order {
            if let Some(at) = self.table.get(*pid).and_then(|r| r.state.follow_up_at) {
                self.follow_ups.register(*pid, at, now);
            }
        }

        let touched: Option<HashSet<Uid, RandomState>> = (!full).then(|| {
            ws.order
                .iter()
                .filter_map(|pid| self.table.get(*pid).map(|r| r.uid))
                .collect()
        });
        let uid_changes = self.uids.update(&self.table, touched.as_ref());

        let events: Vec<AdjEvent> = effects
            .iter()
            .flat_map(|e| AdjEvent::from_effect(now, seq, e))
            .collect();
        self.events.extend(events.iter().cloned());

        self.stats.inc_pass(full);
        self.metrics.set_gauge(names::PROCESSES, self.table.len() as f64);
        self.metrics.set_gauge(names::CACHED_PROCESSES, counts.cached as f64);
        self.metrics.set_gauge(names::EMPTY_PROCESSES, counts.empty as f64);

        if let Some(tx) = &self.effects {
            outbound::publish(tx, effects.iter().cloned());
        }

        let changed = effects
            .first()
            .map_or(0, |e| match e {
                Effect::Scores { changes } => changes.len(),
                _ => 0,
            });
        span.record_outcome(changed, kills.len());

        PassReport {
            seq,
            full,
            reason: Some(reason),
            trace_id: span.trace_id().to_string(),
            now,
            evaluated: ws.order.len(),
            cycle_rounds: ws.cycle_rounds,
            converged: ws.converged,
            counts,
            kills,
            effects,
            events,
            uid_changes,
        }
    }
}
