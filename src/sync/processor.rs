//! Sync processor.
//!
//! Replays the queue against the remote service head to tail, one item at a
//! time. Creates hand their server-assigned id to every queued item waiting
//! on them before anything behind them is dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use super::connectivity::Connectivity;
use super::policy::{RetryPolicy, Verdict};
use crate::error::OutboundError;
use crate::queue::{EntityKind, EvictionRecord, OperationKind, QueueItem, QueueStore};
use crate::remote::{FailureClass, RemoteError, RemoteService};

/// An item applied remotely during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedItem {
    pub item_id: String,
    pub entity: EntityKind,
    pub operation: OperationKind,
    /// Server-assigned id for creates, the target otherwise.
    pub remote_id: Option<String>,
}

/// Why a drain pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum DrainStop {
    /// The queue is empty.
    Drained,
    /// The head failed transiently and stays queued for the next pass.
    Retrying { item_id: String, attempt: u32 },
    /// The head still references a create that was never applied.
    DependencyUnsatisfied { item_id: String, local_id: String },
    /// Connectivity was lost before the next dispatch.
    Offline,
    /// Another drain was already running; this trigger was dropped.
    Coalesced,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub applied: Vec<AppliedItem>,
    pub evicted: Vec<EvictionRecord>,
    #[serde(flatten)]
    pub stop: DrainStop,
}

impl DrainReport {
    const fn new() -> Self {
        Self {
            applied: Vec::new(),
            evicted: Vec::new(),
            stop: DrainStop::Drained,
        }
    }

    /// Whether the pass made any change to the queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.evicted.is_empty()
    }
}

/// Notification for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Applied(AppliedItem),
    Evicted(EvictionRecord),
}

/// Releases the single-drain flag when the pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Step {
    Continue,
    Stop(DrainStop),
}

/// Sequential replayer of the queue.
pub struct SyncProcessor {
    store: Arc<Mutex<QueueStore>>,
    remote: Arc<dyn RemoteService>,
    policy: RetryPolicy,
    connectivity: Connectivity,
    events: broadcast::Sender<SyncEvent>,
    draining: AtomicBool,
}

impl SyncProcessor {
    #[must_use]
    pub fn new(
        store: Arc<Mutex<QueueStore>>,
        remote: Arc<dyn RemoteService>,
        policy: RetryPolicy,
        connectivity: Connectivity,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            remote,
            policy,
            connectivity,
            events,
            draining: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether a drain pass is running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run one drain pass.
    ///
    /// Returns immediately with [`DrainStop::Coalesced`] if another pass is
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written. The item being
    /// processed stays queued.
    pub async fn drain(&self) -> Result<DrainReport, OutboundError> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("drain already running, trigger coalesced");
            return Ok(DrainReport {
                stop: DrainStop::Coalesced,
                ..DrainReport::new()
            });
        };

        let mut report = DrainReport::new();
        // Ids assigned to creates applied in this pass. The store rewrites
        // dependents durably on settle; this map covers anything that still
        // carries a placeholder.
        let mut resolved: HashMap<String, String> = HashMap::new();

        report.stop = loop {
            match self.step(&mut resolved, &mut report).await {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(stop)) => break stop,
                Err(e) => {
                    if let Err(release) = self.store.lock().await.finish_in_flight() {
                        tracing::warn!(error = %release, "could not clear in-flight marker");
                    }
                    return Err(e);
                }
            }
        };

        tracing::info!(
            applied = report.applied.len(),
            evicted = report.evicted.len(),
            stop = ?report.stop,
            "drain finished"
        );

        Ok(report)
    }

    async fn step(
        &self,
        resolved: &mut HashMap<String, String>,
        report: &mut DrainReport,
    ) -> Result<Step, OutboundError> {
        let mut item = {
            let mut store = self.store.lock().await;
            // Other processes may have queued or cleared items.
            store.refresh()?;
            let Some(head) = store.head().cloned() else {
                return Ok(Step::Stop(DrainStop::Drained));
            };
            // Checked per item: going offline mid-pass lets the current call
            // finish but starts no new one.
            if !self.connectivity.is_online() {
                return Ok(Step::Stop(DrainStop::Offline));
            }
            store.mark_in_flight(&head.id)?;
            head
        };

        if let Some(local_id) = item.unresolved().map(str::to_string) {
            match resolved.get(&local_id) {
                Some(remote_id) => item.resolve(remote_id),
                None => {
                    self.store.lock().await.finish_in_flight()?;
                    tracing::warn!(item = %item.id, %local_id, "dependency not satisfied");
                    return Ok(Step::Stop(DrainStop::DependencyUnsatisfied {
                        item_id: item.id,
                        local_id,
                    }));
                }
            }
        }

        tracing::debug!(item = %item.id, action = %item.label(), "dispatching");
        let outcome = self.dispatch(&item).await;

        // Settling, retrying or evicting the item releases the in-flight
        // marker in the same write.
        let mut store = self.store.lock().await;
        store.refresh()?;

        match outcome {
            Ok(remote_id) => {
                if item.is_create() {
                    let remote_id = remote_id.unwrap_or_default();
                    store.settle_create(&item.id, &remote_id)?;
                    resolved.insert(item.id.clone(), remote_id.clone());
                    self.applied(report, &item, Some(remote_id));
                } else {
                    store.remove(&item.id)?;
                    self.applied(report, &item, item.target.clone());
                }
                Ok(Step::Continue)
            }
            Err(err) => {
                let class = err.class();
                if class == FailureClass::TransientNetwork {
                    self.connectivity.report_network_failure();
                }

                // Cleared while the call was running.
                if store.get(&item.id).is_none() {
                    store.finish_in_flight()?;
                    return Ok(Step::Continue);
                }

                match self.policy.decide(item.attempt_count, class) {
                    Verdict::Retry { attempt_count } => {
                        tracing::info!(
                            item = %item.id,
                            attempt = attempt_count,
                            error = %err,
                            "dispatch failed, will retry"
                        );
                        store.update_attempt(&item.id, attempt_count, Some(err.to_string()))?;
                        Ok(Step::Stop(DrainStop::Retrying {
                            item_id: item.id,
                            attempt: attempt_count,
                        }))
                    }
                    Verdict::Evict { reason } => {
                        let records =
                            store.evict_chain(&item.id, class, &reason.describe(&err.to_string()))?;
                        for record in records {
                            tracing::warn!(
                                item = %record.item_id,
                                class = %record.class,
                                reason = %record.reason,
                                "evicted"
                            );
                            let _ = self.events.send(SyncEvent::Evicted(record.clone()));
                            report.evicted.push(record);
                        }
                        Ok(Step::Continue)
                    }
                }
            }
        }
    }

    /// Send one item. Returns the server-assigned id for creates.
    async fn dispatch(&self, item: &QueueItem) -> Result<Option<String>, RemoteError> {
        match item.operation {
            OperationKind::Create => self
                .remote
                .create(&item.entity, &item.payload)
                .await
                .map(Some),
            OperationKind::Update => {
                let target = require_target(item)?;
                self.remote
                    .update(&item.entity, target, &item.payload)
                    .await
                    .map(|()| None)
            }
            OperationKind::Delete => {
                let target = require_target(item)?;
                self.remote.delete(&item.entity, target).await.map(|()| None)
            }
        }
    }

    fn applied(&self, report: &mut DrainReport, item: &QueueItem, remote_id: Option<String>) {
        let applied = AppliedItem {
            item_id: item.id.clone(),
            entity: item.entity.clone(),
            operation: item.operation,
            remote_id,
        };
        tracing::debug!(item = %applied.item_id, remote = ?applied.remote_id, "applied");
        let _ = self.events.send(SyncEvent::Applied(applied.clone()));
        report.applied.push(applied);
    }
}

fn require_target(item: &QueueItem) -> Result<&str, RemoteError> {
    item.target.as_deref().ok_or_else(|| {
        RemoteError::Validation(format!("{} has no target record", item.label()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use crate::queue::{MockQueueBackend, Payload, StoredQueue};
    use crate::remote::MockRemoteService;
    use serde_json::json;

    fn kind(name: &str) -> EntityKind {
        EntityKind::new(name).unwrap()
    }

    fn processor_with(
        remote: MockRemoteService,
        items: Vec<QueueItem>,
        online: bool,
    ) -> (SyncProcessor, Arc<Mutex<QueueStore>>) {
        let mut store = QueueStore::in_memory().unwrap();
        for item in items {
            store.append(item).unwrap();
        }
        let store = Arc::new(Mutex::new(store));
        let processor = SyncProcessor::new(
            Arc::clone(&store),
            Arc::new(remote),
            RetryPolicy::default(),
            Connectivity::new(online),
        );
        (processor, store)
    }

    #[tokio::test]
    async fn test_drain_applies_create() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_create()
            .times(1)
            .returning(|_, _| Ok("srv-1".to_string()));

        let item = QueueItem::create(kind("inspection"), Payload::new());
        let (processor, store) = processor_with(remote, vec![item.clone()], true);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.stop, DrainStop::Drained);
        assert_eq!(report.applied[0].remote_id.as_deref(), Some("srv-1"));
        assert!(store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_offline_does_nothing() {
        let remote = MockRemoteService::new();
        let item = QueueItem::create(kind("inspection"), Payload::new());
        let (processor, store) = processor_with(remote, vec![item], false);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.stop, DrainStop::Offline);
        assert_eq!(store.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_stops_pass() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_update()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::Server { status: 503, message: "busy".to_string() }));

        let first = QueueItem::update(kind("inspection"), "srv-1", Payload::new());
        let second = QueueItem::delete(kind("inspection"), "srv-2");
        let (processor, store) = processor_with(remote, vec![first.clone(), second], true);

        let report = processor.drain().await.unwrap();

        assert_eq!(
            report.stop,
            DrainStop::Retrying {
                item_id: first.id.clone(),
                attempt: 1
            }
        );
        let store = store.lock().await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.head().unwrap().attempt_count, 1);
        assert!(store.in_flight().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_marks_offline() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_delete()
            .times(1)
            .returning(|_, _| Err(RemoteError::Network("connection refused".to_string())));

        let item = QueueItem::delete(kind("inspection"), "srv-1");
        let (processor, _store) = processor_with(remote, vec![item], true);

        processor.drain().await.unwrap();

        assert!(!processor.connectivity.is_online());
    }

    #[tokio::test]
    async fn test_permanent_failure_evicts_and_continues() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_update()
            .times(1)
            .returning(|_, _, _| Err(RemoteError::NotFound("srv-1".to_string())));
        remote.expect_delete().times(1).returning(|_, _| Ok(()));

        let gone = QueueItem::update(kind("inspection"), "srv-1", Payload::new());
        let next = QueueItem::delete(kind("inspection"), "srv-2");
        let (processor, store) = processor_with(remote, vec![gone.clone(), next], true);
        let mut events = processor.subscribe();

        let report = processor.drain().await.unwrap();

        assert_eq!(report.stop, DrainStop::Drained);
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].class, FailureClass::Gone);
        assert_eq!(report.applied.len(), 1);
        assert!(store.lock().await.is_empty());

        match events.recv().await.unwrap() {
            SyncEvent::Evicted(record) => assert_eq!(record.item_id, gone.id),
            SyncEvent::Applied(_) => panic!("expected eviction first"),
        }
    }

    #[tokio::test]
    async fn test_child_gets_parent_remote_id() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_create()
            .withf(|entity, _| entity.as_str() == "inspection")
            .times(1)
            .returning(|_, _| Ok("srv-9".to_string()));
        remote
            .expect_create()
            .withf(|entity, payload| {
                entity.as_str() == "inspection_items" && payload["inspection_id"] == json!("srv-9")
            })
            .times(1)
            .returning(|_, _| Ok("srv-10".to_string()));

        let parent = QueueItem::create(kind("inspection"), Payload::new());
        let child = QueueItem::create_child(kind("inspection_items"), Payload::new(), &parent.id, "inspection_id");
        let (processor, store) = processor_with(remote, vec![parent, child], true);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.applied.len(), 2);
        assert!(store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_placeholder_stops_pass() {
        let remote = MockRemoteService::new();
        let orphan = QueueItem::create_child(kind("inspection_items"), Payload::new(), "local-missing", "inspection_id");
        let (processor, store) = processor_with(remote, vec![orphan.clone()], true);

        let report = processor.drain().await.unwrap();

        assert_eq!(
            report.stop,
            DrainStop::DependencyUnsatisfied {
                item_id: orphan.id,
                local_id: "local-missing".to_string()
            }
        );
        assert_eq!(store.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_drain_is_noop() {
        let remote = MockRemoteService::new();
        let (processor, _store) = processor_with(remote, Vec::new(), true);

        let report = processor.drain().await.unwrap();

        assert_eq!(report.stop, DrainStop::Drained);
        assert!(report.is_empty());
    }

    #[test]
    fn test_drain_guard_is_exclusive() {
        let flag = AtomicBool::new(false);

        let guard = DrainGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(DrainGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(DrainGuard::acquire(&flag).is_some());
    }

    /// Backend that keeps the envelope in memory and fails the save with
    /// the given index.
    fn backend_failing_save(failing: usize) -> MockQueueBackend {
        let stored: Arc<StdMutex<Option<StoredQueue>>> = Arc::default();
        let saves = Arc::new(AtomicUsize::new(0));
        let mut backend = MockQueueBackend::new();

        let read = Arc::clone(&stored);
        backend
            .expect_load()
            .returning(move || Ok(read.lock().unwrap().clone()));
        backend.expect_save().returning(move |state, _| {
            if saves.fetch_add(1, Ordering::SeqCst) == failing {
                return Err(OutboundError::StorageWrite("disk full".to_string()));
            }
            let revision = state.revision + 1;
            *stored.lock().unwrap() = Some(StoredQueue {
                revision,
                ..state.clone()
            });
            Ok(Some(revision))
        });
        backend
    }

    fn processor_on(
        backend: MockQueueBackend,
        remote: MockRemoteService,
        item: QueueItem,
    ) -> (SyncProcessor, Arc<Mutex<QueueStore>>) {
        let mut store = QueueStore::open(backend).unwrap();
        store.append(item).unwrap();
        let store = Arc::new(Mutex::new(store));
        let processor = SyncProcessor::new(
            Arc::clone(&store),
            Arc::new(remote),
            RetryPolicy::default(),
            Connectivity::new(true),
        );
        (processor, store)
    }

    #[tokio::test]
    async fn test_settle_write_failure_keeps_item() {
        let mut remote = MockRemoteService::new();
        remote
            .expect_create()
            .times(1)
            .returning(|_, _| Ok("srv-1".to_string()));

        // Saves: append, mark in flight, settle (fails), release marker.
        let item = QueueItem::create(kind("inspection"), Payload::new());
        let (processor, store) = processor_on(backend_failing_save(2), remote, item.clone());
        let mut events = processor.subscribe();

        let result = processor.drain().await;

        assert!(matches!(result, Err(OutboundError::StorageWrite(_))));
        let store = store.lock().await;
        assert_eq!(store.list(), vec![item]);
        assert!(store.in_flight().is_none());
        assert!(events.try_recv().is_err());
        assert!(!processor.is_draining());
    }

    #[tokio::test]
    async fn test_mark_write_failure_sends_nothing() {
        let mut remote = MockRemoteService::new();
        remote.expect_create().times(0);

        let item = QueueItem::create(kind("inspection"), Payload::new());
        let (processor, store) = processor_on(backend_failing_save(1), remote, item);

        let result = processor.drain().await;

        assert!(matches!(result, Err(OutboundError::StorageWrite(_))));
        let store = store.lock().await;
        assert_eq!(store.len(), 1);
        assert!(store.in_flight().is_none());
    }
}
