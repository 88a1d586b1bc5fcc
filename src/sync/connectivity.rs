//! Connectivity signal and monitor.
//!
//! [`Connectivity`] holds the current online flag. It is fed by the platform
//! signal (in the CLI, a reachability probe) and by failed dispatches that
//! prove the network is gone. Each offline→online edge emits one event.
//!
//! [`ConnectivityMonitor`] listens for those events and starts a drain on
//! each online edge. While online it also re-runs the drain after a retry
//! backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::processor::{DrainReport, DrainStop, SyncProcessor};

/// Edge of the connectivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Shared online/offline state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl Connectivity {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            online: Arc::new(AtomicBool::new(initially_online)),
            events,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Feed a platform reading. Returns `true` if this was an edge.
    pub fn set_online(&self, online: bool) -> bool {
        let was = self.online.swap(online, Ordering::AcqRel);
        if was == online {
            return false;
        }

        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        tracing::info!(?event, "connectivity changed");
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
        true
    }

    /// A dispatch failed with a network-class error.
    pub fn report_network_failure(&self) {
        if self.set_online(false) {
            tracing::debug!("offline inferred from failed dispatch");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Running monitor task.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    reports: broadcast::Sender<DrainReport>,
}

impl MonitorHandle {
    /// Reports of drains started by the monitor.
    #[must_use]
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DrainReport> {
        self.reports.subscribe()
    }

    /// Stop the monitor and wait for it. A drain already running is allowed
    /// to finish on its own.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "connectivity monitor ended abnormally");
        }
    }
}

/// Starts drains on online edges and on retry deadlines.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Spawn the monitor on the current tokio runtime.
    ///
    /// If the signal is already online when the monitor starts, one drain is
    /// started immediately.
    #[must_use]
    pub fn spawn(connectivity: Connectivity, processor: Arc<SyncProcessor>) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (reports, _) = broadcast::channel(16);
        let events = connectivity.subscribe();

        let task = tokio::spawn(run(
            connectivity,
            processor,
            events,
            shutdown_rx,
            reports.clone(),
        ));

        MonitorHandle {
            shutdown: Some(shutdown_tx),
            task,
            reports,
        }
    }
}

async fn run(
    connectivity: Connectivity,
    processor: Arc<SyncProcessor>,
    mut events: broadcast::Receiver<ConnectivityEvent>,
    mut shutdown: oneshot::Receiver<()>,
    reports: broadcast::Sender<DrainReport>,
) {
    let (done_tx, mut done_rx) = mpsc::channel::<DrainReport>(4);
    let mut retry_at: Option<Instant> = None;

    if connectivity.is_online() {
        start_drain(&processor, &done_tx);
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            event = events.recv() => match event {
                Ok(ConnectivityEvent::Online) => {
                    retry_at = None;
                    start_drain(&processor, &done_tx);
                }
                Ok(ConnectivityEvent::Offline) => retry_at = None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "connectivity events lagged");
                    if connectivity.is_online() {
                        start_drain(&processor, &done_tx);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            Some(report) = done_rx.recv() => {
                match &report.stop {
                    DrainStop::Retrying { attempt, .. } if connectivity.is_online() => {
                        let delay = processor.policy().backoff(*attempt);
                        tracing::debug!(?delay, "scheduling retry pass");
                        retry_at = Some(Instant::now() + delay);
                    }
                    // An online edge that arrived while this pass was running
                    // was coalesced into it.
                    DrainStop::Offline if connectivity.is_online() => {
                        start_drain(&processor, &done_tx);
                    }
                    _ => {}
                }
                let _ = reports.send(report);
            }

            () = sleep_until(retry_at) => {
                retry_at = None;
                if connectivity.is_online() {
                    start_drain(&processor, &done_tx);
                }
            }
        }
    }

    tracing::debug!("connectivity monitor stopped");
}

fn start_drain(processor: &Arc<SyncProcessor>, done: &mpsc::Sender<DrainReport>) {
    let processor = Arc::clone(processor);
    let done = done.clone();
    tokio::spawn(async move {
        match processor.drain().await {
            Ok(report) => {
                if report.stop != DrainStop::Coalesced {
                    let _ = done.send(report).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "drain failed"),
        }
    });
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
