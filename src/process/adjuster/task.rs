/*!
 * Adjuster Task
 *
 * Background worker that owns pass execution. Callers post requests from
 * any thread; the worker merges them through the coalescer, runs one pass
 * at a time and wakes itself for expired follow-ups.
 */

use super::coalescer::{Coalescer, UpdateReason};
use super::signals::GlobalSignals;
use super::{OomAdjuster, PassReport};
use crate::core::errors::{AdjusterError, Result};
use crate::core::types::{ConnectionId, Pid};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const REPORT_BACKLOG: usize = 64;

/// Control messages for the adjuster task
#[derive(Debug, Clone)]
pub enum AdjusterCommand {
    /// Publish a new signals snapshot and schedule a full pass
    Signals(GlobalSignals),
    /// Dry-run a new service binding and enqueue its host if needed
    ServiceBound(ConnectionId),
    /// Dry-run a new provider connection and enqueue its host if needed
    ProviderConnected(ConnectionId),
    /// Remove a binding; its host is enqueued if the removal matters
    UnbindService(ConnectionId),
    DisconnectProvider(ConnectionId),
    /// Run whatever is pending now
    Drain(UpdateReason),
    Shutdown,
}

/// Handle to the adjuster background task
pub struct AdjusterTask {
    command_tx: mpsc::UnboundedSender<AdjusterCommand>,
    coalescer: Arc<Coalescer>,
    adjuster: Arc<Mutex<OomAdjuster>>,
    reports: flume::Receiver<PassReport>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AdjusterTask {
    /// Move the adjuster behind a lock and start the worker
    pub fn spawn(adjuster: OomAdjuster) -> Self {
        Self::spawn_shared(Arc::new(Mutex::new(adjuster)))
    }

    pub fn spawn_shared(adjuster: Arc<Mutex<OomAdjuster>>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (report_tx, reports) = flume::bounded(REPORT_BACKLOG);
        let coalescer = adjuster.lock().coalescer();

        let worker = Worker {
            adjuster: Arc::clone(&adjuster),
            coalescer: Arc::clone(&coalescer),
            reports: report_tx,
        };
        let handle = tokio::spawn(async move {
            worker.run(command_rx).await;
        });

        info!("Adjuster task spawned");

        Self {
            command_tx,
            coalescer,
            adjuster,
            reports,
            handle: Some(handle),
        }
    }

    /// Shared access to the adjuster between passes
    pub fn adjuster(&self) -> Arc<Mutex<OomAdjuster>> {
        Arc::clone(&self.adjuster)
    }

    /// Reports of completed passes; old reports are dropped when nobody reads
    pub fn reports(&self) -> flume::Receiver<PassReport> {
        self.reports.clone()
    }

    /// Request a pass over `pid` and everything it reaches
    pub fn request_update(&self, pid: Pid, reason: UpdateReason) {
        self.coalescer.request(pid, reason);
    }

    pub fn request_full(&self, reason: UpdateReason) {
        self.coalescer.request_full(reason);
    }

    pub fn enqueue(&self, pid: Pid) {
        self.coalescer.enqueue(pid);
    }

    pub fn update_pending(&self, reason: UpdateReason) -> Result<()> {
        self.send(AdjusterCommand::Drain(reason))
    }

    pub fn publish_signals(&self, signals: GlobalSignals) -> Result<()> {
        self.send(AdjusterCommand::Signals(signals))
    }

    pub fn service_bound(&self, id: ConnectionId) -> Result<()> {
        self.send(AdjusterCommand::ServiceBound(id))
    }

    pub fn provider_connected(&self, id: ConnectionId) -> Result<()> {
        self.send(AdjusterCommand::ProviderConnected(id))
    }

    pub fn unbind_service(&self, id: ConnectionId) -> Result<()> {
        self.send(AdjusterCommand::UnbindService(id))
    }

    pub fn disconnect_provider(&self, id: ConnectionId) -> Result<()> {
        self.send(AdjusterCommand::DisconnectProvider(id))
    }

    fn send(&self, cmd: AdjusterCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|_| AdjusterError::Shutdown)
    }

    /// Stop the worker after the pass in flight, if any
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(AdjusterCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Adjuster task shutdown error: {}", e);
            } else {
                info!("Adjuster task shutdown complete");
            }
        }
    }
}

impl Drop for AdjusterTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("Adjuster task dropped without shutdown; aborting worker");
            let _ = self.command_tx.send(AdjusterCommand::Shutdown);
            handle.abort();
        }
    }
}

struct Worker {
    adjuster: Arc<Mutex<OomAdjuster>>,
    coalescer: Arc<Coalescer>,
    reports: flume::Sender<PassReport>,
}

impl Worker {
    async fn run(self, mut command_rx: mpsc::UnboundedReceiver<AdjusterCommand>) {
        info!("Adjuster loop started");

        loop {
            let wake = self.follow_up_delay();

            tokio::select! {
                _ = self.coalescer.notified() => {
                    self.drain();
                }

                _ = tokio::time::sleep(wake.unwrap_or_default()), if wake.is_some() => {
                    let report = self.adjuster.lock().process_follow_ups();
                    if let Some(report) = report {
                        self.emit(report);
                    }
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(AdjusterCommand::Signals(signals)) => {
                            self.adjuster.lock().set_signals(signals);
                            self.coalescer.request_full(UpdateReason::Policy);
                        }
                        Some(AdjusterCommand::ServiceBound(id)) => {
                            if self.adjuster.lock().on_service_bound(id) {
                                self.coalescer.kick(UpdateReason::BindService);
                            }
                        }
                        Some(AdjusterCommand::ProviderConnected(id)) => {
                            if self.adjuster.lock().on_provider_connected(id) {
                                self.coalescer.kick(UpdateReason::GetProvider);
                            }
                        }
                        Some(AdjusterCommand::UnbindService(id)) => {
                            match self.adjuster.lock().unbind_service(id) {
                                Ok(true) => self.coalescer.kick(UpdateReason::UnbindService),
                                Ok(false) => {}
                                Err(e) => warn!("Unbind of connection {} failed: {}", id, e),
                            }
                        }
                        Some(AdjusterCommand::DisconnectProvider(id)) => {
                            match self.adjuster.lock().disconnect_provider(id) {
                                Ok(true) => self.coalescer.kick(UpdateReason::RemoveProvider),
                                Ok(false) => {}
                                Err(e) => warn!("Disconnect of provider {} failed: {}", id, e),
                            }
                        }
                        Some(AdjusterCommand::Drain(reason)) => {
                            self.coalescer.note_reason(reason);
                            self.drain();
                        }
                        Some(AdjusterCommand::Shutdown) | None => {
                            info!("Adjuster task shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn follow_up_delay(&self) -> Option<Duration> {
        let adjuster = self.adjuster.lock();
        let at = adjuster.next_follow_up()?;
        Some(Duration::from_millis(at.saturating_sub(adjuster.now())))
    }

    fn drain(&self) {
        let reports = self.adjuster.lock().drain();
        for report in reports {
            self.emit(report);
        }
    }

    fn emit(&self, report: PassReport) {
        debug!("Pass {} finished ({} evaluated)", report.seq, report.evaluated);
        if self.reports.try_send(report).is_err() {
            log::trace!("Report backlog full; dropping pass report");
        }
    }
}
