//! End-to-end replay scenarios against an in-process remote.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

use outbound::queue::{EntityKind, OperationKind, Payload, QueueStore};
use outbound::remote::{FailureClass, RemoteError, RemoteService};
use outbound::sync::{Action, ChildRows, Connectivity, DrainStop, RetryPolicy, SyncEngine};

#[derive(Debug, Clone, PartialEq)]
struct Call {
    operation: OperationKind,
    entity: String,
    target: Option<String>,
    payload: Payload,
}

/// Records every call, succeeds unless a failure was scripted.
#[derive(Default)]
struct FakeRemote {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<RemoteError>>,
    ids: Mutex<VecDeque<String>>,
    counter: AtomicU32,
    gate: Option<Arc<Notify>>,
}

impl FakeRemote {
    fn with_ids(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|s| (*s).to_string()).collect()),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn answer(&self, call: Call) -> Result<(), RemoteError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn create(&self, entity: &EntityKind, payload: &Payload) -> Result<String, RemoteError> {
        self.answer(Call {
            operation: OperationKind::Create,
            entity: entity.to_string(),
            target: None,
            payload: payload.clone(),
        })
        .await?;

        let scripted = self.ids.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| {
            format!("srv-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        }))
    }

    async fn update(
        &self,
        entity: &EntityKind,
        id: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError> {
        self.answer(Call {
            operation: OperationKind::Update,
            entity: entity.to_string(),
            target: Some(id.to_string()),
            payload: payload.clone(),
        })
        .await
    }

    async fn delete(&self, entity: &EntityKind, id: &str) -> Result<(), RemoteError> {
        self.answer(Call {
            operation: OperationKind::Delete,
            entity: entity.to_string(),
            target: Some(id.to_string()),
            payload: Payload::new(),
        })
        .await
    }
}

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name).unwrap()
}

fn fields(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn engine_with(store: QueueStore, remote: &Arc<FakeRemote>) -> SyncEngine {
    let service: Arc<dyn RemoteService> = remote.clone();
    SyncEngine::new(store, service, RetryPolicy::default(), Connectivity::new(false))
}

fn offline_engine(remote: &Arc<FakeRemote>) -> SyncEngine {
    engine_with(QueueStore::in_memory().unwrap(), remote)
}

fn inspection_with_items(rows: &[&str]) -> Action {
    Action::create(kind("inspection"), fields(json!({"date": "2025-01-01"}))).with_children(
        ChildRows {
            entity: kind("inspection_items"),
            parent_field: "inspection_id".to_string(),
            rows: rows
                .iter()
                .map(|label| fields(json!({ "label": label })))
                .collect(),
        },
    )
}

#[tokio::test]
async fn test_offline_create_syncs_when_online() {
    let remote = Arc::new(FakeRemote::with_ids(&["srv-1"]));
    let engine = offline_engine(&remote);

    engine
        .record(Action::create(kind("inspection"), fields(json!({"date": "2025-01-01"}))))
        .await
        .unwrap();

    let offline = engine.sync_now().await.unwrap();
    assert_eq!(offline.stop, DrainStop::Offline);
    assert!(remote.calls().is_empty());
    assert_eq!(engine.snapshot().await.pending, 1);

    engine.set_online(true);
    let report = engine.sync_now().await.unwrap();

    assert_eq!(report.stop, DrainStop::Drained);
    assert_eq!(report.applied[0].remote_id.as_deref(), Some("srv-1"));
    assert_eq!(engine.snapshot().await.pending, 0);
    assert_eq!(engine.snapshot().await.oldest_enqueued_at, None);
}

#[tokio::test]
async fn test_child_rows_use_parent_remote_id() {
    let remote = Arc::new(FakeRemote::with_ids(&["srv-9", "srv-10", "srv-11"]));
    let engine = offline_engine(&remote);

    let resolution = engine
        .record(inspection_with_items(&["brakes", "tyres"]))
        .await
        .unwrap();
    let local_parent = resolution.record_id.unwrap();

    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].entity, "inspection");
    for child in &calls[1..] {
        assert_eq!(child.entity, "inspection_items");
        assert_eq!(child.payload["inspection_id"], json!("srv-9"));
        assert_ne!(child.payload["inspection_id"], json!(local_parent));
    }
}

#[tokio::test]
async fn test_delete_before_sync_sends_nothing() {
    let remote = Arc::new(FakeRemote::default());
    let engine = offline_engine(&remote);

    let created = engine.record(inspection_with_items(&["brakes"])).await.unwrap();
    engine
        .record(Action::Update {
            entity: kind("inspection"),
            id: created.record_id.clone().unwrap(),
            payload: fields(json!({"notes": "re-check"})),
        })
        .await
        .unwrap();
    engine
        .record(Action::Delete {
            entity: kind("inspection"),
            id: created.record_id.unwrap(),
        })
        .await
        .unwrap();

    engine.set_online(true);
    let report = engine.sync_now().await.unwrap();

    assert!(report.is_empty());
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_update_of_pending_create_is_sent_with_create() {
    let remote = Arc::new(FakeRemote::default());
    let engine = offline_engine(&remote);

    let created = engine
        .record(Action::create(kind("inspection"), fields(json!({"date": "2025-01-01"}))))
        .await
        .unwrap();
    engine
        .record(Action::Update {
            entity: kind("inspection"),
            id: created.record_id.unwrap(),
            payload: fields(json!({"date": "2025-03-03"})),
        })
        .await
        .unwrap();

    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, OperationKind::Create);
    assert_eq!(calls[0].payload["date"], json!("2025-03-03"));
}

#[tokio::test]
async fn test_transient_failures_evict_at_ceiling() {
    let remote = Arc::new(FakeRemote::default());
    remote.fail_next((0..3).map(|_| RemoteError::Network("connection reset".to_string())));
    let engine = offline_engine(&remote);
    let mut feed = engine.subscribe_evictions();

    engine
        .record(Action::Update {
            entity: kind("inspection"),
            id: "srv-1".to_string(),
            payload: fields(json!({"status": "closed"})),
        })
        .await
        .unwrap();

    for attempt in 1..=2 {
        engine.set_online(true);
        let report = engine.sync_now().await.unwrap();
        assert!(matches!(report.stop, DrainStop::Retrying { attempt: a, .. } if a == attempt));
        // A network failure is evidence of being offline.
        assert!(!engine.connectivity().is_online());
        assert_eq!(engine.list().await[0].attempt_count, attempt);
    }

    engine.set_online(true);
    let report = engine.sync_now().await.unwrap();

    assert_eq!(report.stop, DrainStop::Drained);
    assert_eq!(report.evicted.len(), 1);
    assert_eq!(remote.calls().len(), 3);
    assert_eq!(engine.snapshot().await.pending, 0);

    let record = feed.recv().await.unwrap();
    assert_eq!(record.class, FailureClass::TransientNetwork);
    assert!(record.reason.contains("after 3 attempts"));
    assert_eq!(engine.failures().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_permanent_failure_takes_children_and_continues() {
    let remote = Arc::new(FakeRemote::default());
    remote.fail_next([RemoteError::Validation("date is required".to_string())]);
    let engine = offline_engine(&remote);

    engine.record(inspection_with_items(&["brakes", "tyres"])).await.unwrap();
    engine
        .record(Action::Delete {
            entity: kind("vehicle"),
            id: "srv-4".to_string(),
        })
        .await
        .unwrap();

    engine.set_online(true);
    let report = engine.sync_now().await.unwrap();

    assert_eq!(report.evicted.len(), 3);
    assert!(report.evicted[0].caused_by.is_none());
    assert!(report.evicted[1..].iter().all(|r| r.caused_by.is_some()));
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].entity, kind("vehicle"));

    // Parent once, then the unrelated delete; children were never sent.
    let calls = remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].operation, OperationKind::Delete);
}

#[tokio::test]
async fn test_empty_drain_is_idempotent() {
    let remote = Arc::new(FakeRemote::default());
    let engine = offline_engine(&remote);
    engine.set_online(true);

    for _ in 0..3 {
        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.stop, DrainStop::Drained);
        assert!(report.is_empty());
    }
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_dispatch_order_is_fifo() {
    let remote = Arc::new(FakeRemote::default());
    let engine = offline_engine(&remote);

    for n in 1..=5 {
        engine
            .record(Action::Delete {
                entity: kind("inspection"),
                id: format!("srv-{n}"),
            })
            .await
            .unwrap();
    }

    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let targets: Vec<String> = remote
        .calls()
        .into_iter()
        .filter_map(|c| c.target)
        .collect();
    assert_eq!(targets, ["srv-1", "srv-2", "srv-3", "srv-4", "srv-5"]);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("outbound.db");

    {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(QueueStore::open_at(&path).unwrap(), &remote);
        engine.record(inspection_with_items(&["brakes"])).await.unwrap();
        engine
            .record(Action::Delete {
                entity: kind("vehicle"),
                id: "srv-4".to_string(),
            })
            .await
            .unwrap();
    }

    let remote = Arc::new(FakeRemote::with_ids(&["srv-9", "srv-10"]));
    let engine = engine_with(QueueStore::open_at(&path).unwrap(), &remote);
    assert_eq!(engine.snapshot().await.pending, 3);

    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].payload["inspection_id"], json!("srv-9"));
    assert_eq!(calls[2].target.as_deref(), Some("srv-4"));
}

#[tokio::test]
async fn test_restart_after_parent_applied_does_not_resend_it() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("outbound.db");

    {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(QueueStore::open_at(&path).unwrap(), &remote);
        engine.record(inspection_with_items(&["brakes"])).await.unwrap();
    }

    // Simulate the crash window: parent applied and settled, process dies
    // before the child is sent.
    {
        let mut store = QueueStore::open_at(&path).unwrap();
        let parent = store.head().unwrap().id.clone();
        store.settle_create(&parent, "srv-9").unwrap();
    }

    let remote = Arc::new(FakeRemote::default());
    let engine = engine_with(QueueStore::open_at(&path).unwrap(), &remote);
    engine.set_online(true);
    engine.sync_now().await.unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].entity, "inspection_items");
    assert_eq!(calls[0].payload["inspection_id"], json!("srv-9"));
}

#[tokio::test]
async fn test_concurrent_triggers_coalesce() {
    let gate = Arc::new(Notify::new());
    let remote = Arc::new(FakeRemote::gated(Arc::clone(&gate)));
    let engine = Arc::new(offline_engine(&remote));

    engine
        .record(Action::Delete {
            entity: kind("inspection"),
            id: "srv-1".to_string(),
        })
        .await
        .unwrap();
    engine.set_online(true);

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };

    while !engine.status().await.unwrap().draining {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = engine.sync_now().await.unwrap();
    assert_eq!(second.stop, DrainStop::Coalesced);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.stop, DrainStop::Drained);
    assert_eq!(remote.calls().len(), 1);
}

#[tokio::test]
async fn test_going_offline_mid_drain_stops_after_current_call() {
    let gate = Arc::new(Notify::new());
    let remote = Arc::new(FakeRemote::gated(Arc::clone(&gate)));
    let engine = Arc::new(offline_engine(&remote));

    for n in 1..=2 {
        engine
            .record(Action::Delete {
                entity: kind("inspection"),
                id: format!("srv-{n}"),
            })
            .await
            .unwrap();
    }
    engine.set_online(true);

    let drain = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_now().await })
    };

    while engine.snapshot().await.in_flight.is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    engine.set_online(false);
    gate.notify_one();

    let report = drain.await.unwrap().unwrap();

    assert_eq!(report.stop, DrainStop::Offline);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(engine.snapshot().await.pending, 1);
}

#[tokio::test]
async fn test_monitor_drains_on_online_edge() {
    let remote = Arc::new(FakeRemote::default());
    let engine = offline_engine(&remote);
    engine
        .record(Action::create(kind("inspection"), Payload::new()))
        .await
        .unwrap();

    let monitor = engine.spawn_monitor();
    let mut reports = monitor.subscribe_reports();

    engine.set_online(true);

    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.stop, DrainStop::Drained);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(engine.snapshot().await.pending, 0);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_watch_drains_actions_recorded_by_another_process() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("outbound.db");
    let remote = Arc::new(FakeRemote::with_ids(&["srv-1", "srv-2"]));
    let watcher = engine_with(QueueStore::open_at(&path).unwrap(), &remote);
    let cli = engine_with(QueueStore::open_at(&path).unwrap(), &remote);

    let parent = watcher
        .record(Action::create(kind("inspection"), fields(json!({"date": "2025-01-01"}))))
        .await
        .unwrap();
    cli.record(Action::create(kind("vehicle"), Payload::new()))
        .await
        .unwrap();
    cli.record(Action::Update {
        entity: kind("inspection"),
        id: parent.record_id.clone().unwrap(),
        payload: fields(json!({"notes": "tyres worn"})),
    })
    .await
    .unwrap();

    watcher.set_online(true);
    let report = watcher.sync_now().await.unwrap();

    assert_eq!(report.stop, DrainStop::Drained);
    assert_eq!(report.applied.len(), 2);
    let calls = remote.calls();
    assert_eq!(calls[0].entity, "inspection");
    assert_eq!(calls[0].payload["notes"], json!("tyres worn"));
    assert_eq!(calls[1].entity, "vehicle");

    let reopened = QueueStore::open_at(&path).unwrap();
    assert!(reopened.is_empty());
}
