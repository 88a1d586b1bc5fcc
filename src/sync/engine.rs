//! UI-facing facade over the queue, the processor and the connectivity
//! signal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use super::connectivity::{Connectivity, ConnectivityMonitor, MonitorHandle};
use super::policy::RetryPolicy;
use super::processor::{DrainReport, SyncEvent, SyncProcessor};
use super::resolver::{self, Action, Resolution};
use crate::error::OutboundError;
use crate::queue::{EvictionRecord, QueueItem, QueueSnapshot, QueueStore};
use crate::remote::RemoteService;

/// Everything a status line needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub pending: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub in_flight: Option<String>,
    /// Evictions awaiting dismissal.
    pub failed: usize,
    pub online: bool,
    pub draining: bool,
}

/// Receiver of eviction notifications.
pub struct EvictionFeed {
    rx: broadcast::Receiver<SyncEvent>,
}

impl EvictionFeed {
    /// Wait for the next eviction. Returns `None` once the engine is gone.
    ///
    /// Notifications missed because the receiver fell behind are skipped;
    /// the durable log in [`SyncEngine::failures`] still has them.
    pub async fn recv(&mut self) -> Option<EvictionRecord> {
        loop {
            match self.rx.recv().await {
                Ok(SyncEvent::Evicted(record)) => return Some(record),
                Ok(SyncEvent::Applied(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "eviction feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One queue with its replayer.
pub struct SyncEngine {
    store: Arc<Mutex<QueueStore>>,
    processor: Arc<SyncProcessor>,
    connectivity: Connectivity,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        store: QueueStore,
        remote: Arc<dyn RemoteService>,
        policy: RetryPolicy,
        connectivity: Connectivity,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));
        let processor = Arc::new(SyncProcessor::new(
            Arc::clone(&store),
            remote,
            policy,
            connectivity.clone(),
        ));

        Self {
            store,
            processor,
            connectivity,
        }
    }

    /// Record a user action. Once this returns `Ok`, the action is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is invalid or could not be persisted.
    pub async fn record(&self, action: Action) -> Result<Resolution, OutboundError> {
        let mut store = self.store.lock().await;
        resolver::record(&mut store, action)
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.store.lock().await.snapshot()
    }

    /// Queue snapshot plus eviction count and signal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the eviction log cannot be read.
    pub async fn status(&self) -> Result<EngineStatus, OutboundError> {
        let store = self.store.lock().await;
        let snapshot = store.snapshot();
        let failed = store.failures()?.len();

        Ok(EngineStatus {
            pending: snapshot.pending,
            oldest_enqueued_at: snapshot.oldest_enqueued_at,
            in_flight: snapshot.in_flight,
            failed,
            online: self.connectivity.is_online(),
            draining: self.processor.is_draining(),
        })
    }

    pub async fn list(&self) -> Vec<QueueItem> {
        self.store.lock().await.list()
    }

    /// Run a drain pass now, coalescing with one already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn sync_now(&self) -> Result<DrainReport, OutboundError> {
        self.processor.drain().await
    }

    #[must_use]
    pub fn subscribe_evictions(&self) -> EvictionFeed {
        EvictionFeed {
            rx: self.processor.subscribe(),
        }
    }

    /// Every applied and evicted item, as it happens.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.processor.subscribe()
    }

    /// Evictions awaiting dismissal, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the eviction log cannot be read.
    pub async fn failures(&self) -> Result<Vec<EvictionRecord>, OutboundError> {
        self.store.lock().await.failures()
    }

    /// Dismiss one eviction. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub async fn dismiss(&self, id: i64) -> Result<bool, OutboundError> {
        self.store.lock().await.dismiss(id)
    }

    /// Dismiss every eviction. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub async fn dismiss_all(&self) -> Result<usize, OutboundError> {
        self.store.lock().await.dismiss_all()
    }

    /// Drop every pending operation without sending it.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn clear(&self) -> Result<(), OutboundError> {
        self.store.lock().await.clear()
    }

    /// Feed the platform connectivity reading. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    #[must_use]
    pub const fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Start draining automatically on every offline→online edge.
    #[must_use]
    pub fn spawn_monitor(&self) -> MonitorHandle {
        ConnectivityMonitor::spawn(self.connectivity.clone(), Arc::clone(&self.processor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EntityKind, Payload};
    use crate::remote::{MockRemoteService, RemoteError};
    use serde_json::json;

    fn kind(name: &str) -> EntityKind {
        EntityKind::new(name).unwrap()
    }

    fn engine(remote: MockRemoteService, online: bool) -> SyncEngine {
        SyncEngine::new(
            QueueStore::in_memory().unwrap(),
            Arc::new(remote),
            RetryPolicy::default(),
            Connectivity::new(online),
        )
    }

    #[tokio::test]
    async fn test_record_then_sync() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_create()
            .times(1)
            .returning(|_, _| Ok("srv-1".to_string()));

        let engine = engine(remote, false);
        engine
            .record(Action::create(
                kind("inspection"),
                json!({"date": "2025-01-01"}).as_object().cloned().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(engine.snapshot().await.pending, 1);

        engine.set_online(true);
        engine.sync_now().await.unwrap();

        assert_eq!(engine.snapshot().await.pending, 0);
    }

    #[tokio::test]
    async fn test_eviction_feed_and_dismiss() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_create()
            .returning(|_, _| Err(RemoteError::Validation("date is required".to_string())));

        let engine = engine(remote, true);
        let mut feed = engine.subscribe_evictions();
        engine
            .record(Action::create(kind("inspection"), Payload::new()))
            .await
            .unwrap();

        engine.sync_now().await.unwrap();

        let record = feed.recv().await.unwrap();
        assert!(record.reason.contains("date is required"));

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.failed, 1);

        let failures = engine.failures().await.unwrap();
        assert!(engine.dismiss(failures[0].id.unwrap()).await.unwrap());
        assert_eq!(engine.status().await.unwrap().failed, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let engine = engine(MockRemoteService::new(), false);
        engine
            .record(Action::create(kind("inspection"), Payload::new()))
            .await
            .unwrap();

        engine.clear().await.unwrap();

        assert!(engine.list().await.is_empty());
    }
}
