//! Durable queue store.
//!
//! Every mutation is a plan over the current state: the store builds the
//! next state, persists it, and only then replaces the in-memory copy. If
//! another process wrote in the meantime, the store reloads and runs the
//! plan again on what is actually stored.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::{EvictionRecord, QueueBackend, SqliteBackend, StoredQueue};
use super::item::{Payload, QueueItem};
use crate::error::OutboundError;
use crate::remote::FailureClass;
use crate::storage::Database;

/// Version of the persisted queue envelope.
pub const QUEUE_FORMAT_VERSION: i64 = 1;

/// How many times a mutation is re-planned after losing a race.
const MAX_WRITE_ATTEMPTS: usize = 8;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: i64,
    items: Vec<QueueItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    in_flight: Option<String>,
}

/// Everything persisted in the envelope.
#[derive(Debug, Clone, Default, PartialEq)]
struct QueueState {
    items: Vec<QueueItem>,
    /// Item a drain is dispatching. Stored so resolvers in other processes
    /// leave it alone.
    in_flight: Option<String>,
}

impl QueueState {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    fn release(&mut self, id: &str) {
        if self.in_flight.as_deref() == Some(id) {
            self.in_flight = None;
        }
    }
}

/// One change produced by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Add an item at the tail.
    Append(QueueItem),
    /// Merge fields into a queued item's payload, keeping its position.
    Amend { id: String, fields: Payload },
    /// Remove a queued item without contacting the remote.
    Drop(String),
}

/// Read-only view for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub in_flight: Option<String>,
}

/// Next state, evictions to log with it, and the caller's result.
type Planned<T> = (QueueState, Vec<EvictionRecord>, T);

/// Ordered, durable sequence of pending operations.
pub struct QueueStore {
    backend: Box<dyn QueueBackend>,
    state: QueueState,
    revision: i64,
}

impl QueueStore {
    /// Open a store on top of the given backend, loading persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted queue cannot be read or was written
    /// by a newer format.
    pub fn open(backend: impl QueueBackend + 'static) -> Result<Self, OutboundError> {
        let (state, revision) = match backend.load()? {
            Some(stored) => (decode(&stored)?, stored.revision),
            None => (QueueState::default(), 0),
        };

        tracing::debug!(pending = state.items.len(), revision, "queue loaded");

        Ok(Self {
            backend: Box::new(backend),
            state,
            revision,
        })
    }

    /// Open the store in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or the queue cannot be opened.
    pub fn open_at(path: &std::path::Path) -> Result<Self, OutboundError> {
        Self::open(SqliteBackend::new(Database::open_at(path)?))
    }

    /// Open a store backed by an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self, OutboundError> {
        Self::open(SqliteBackend::new(Database::open_in_memory()?))
    }

    /// Pick up writes made by other processes since the last read or write.
    ///
    /// Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted queue cannot be read or was written
    /// by a newer format.
    pub fn refresh(&mut self) -> Result<bool, OutboundError> {
        let stored = self.backend.load()?;
        let revision = stored.as_ref().map_or(0, |s| s.revision);
        if revision == self.revision {
            return Ok(false);
        }

        self.state = match stored {
            Some(stored) => decode(&stored)?,
            None => QueueState::default(),
        };
        tracing::debug!(from = self.revision, to = revision, "queue reloaded");
        self.revision = revision;
        Ok(true)
    }

    /// Add an item at the tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already queued or the write fails.
    pub fn append(&mut self, item: QueueItem) -> Result<(), OutboundError> {
        self.apply(vec![Change::Append(item)])
    }

    /// Remove the item with the given id. Absent ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn remove(&mut self, id: &str) -> Result<(), OutboundError> {
        self.commit(|state| {
            let mut next = state.clone();
            next.items.retain(|i| i.id != id);
            next.release(id);
            Ok((next, Vec::new(), ()))
        })
    }

    /// Snapshot of the queue in FIFO order.
    #[must_use]
    pub fn list(&self) -> Vec<QueueItem> {
        self.state.items.clone()
    }

    /// The oldest queued item.
    #[must_use]
    pub fn head(&self) -> Option<&QueueItem> {
        self.state.items.first()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.state.items.iter().find(|i| i.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.items.is_empty()
    }

    /// Persist a new attempt count for an item without moving it.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is not queued or the write fails.
    pub fn update_attempt(
        &mut self,
        id: &str,
        attempt_count: u32,
        last_error: Option<String>,
    ) -> Result<(), OutboundError> {
        self.commit(|state| {
            let pos = state
                .position(id)
                .ok_or_else(|| OutboundError::NotFound(format!("queue item {id}")))?;

            let mut next = state.clone();
            next.items[pos].attempt_count = attempt_count;
            next.items[pos].last_error.clone_from(&last_error);
            next.release(id);
            Ok((next, Vec::new(), ()))
        })
    }

    /// Empty the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn clear(&mut self) -> Result<(), OutboundError> {
        self.commit(|_| Ok((QueueState::default(), Vec::new(), ())))
    }

    /// Apply a batch of changes in a single write.
    ///
    /// # Errors
    ///
    /// Returns an error if a change references an unknown item, appends a
    /// duplicate id, or the write fails.
    pub fn apply(&mut self, changes: Vec<Change>) -> Result<(), OutboundError> {
        self.apply_with(|_, _| Ok((changes.clone(), ())))
    }

    /// Derive changes from the stored queue and apply them in one write.
    ///
    /// `plan` receives the queued items and the in-flight id. It runs again
    /// if another process changed the queue before the write landed, so
    /// the changes always match what they are applied to.
    ///
    /// # Errors
    ///
    /// Returns an error if `plan` fails, a change does not apply, or the
    /// write fails.
    pub fn apply_with<T>(
        &mut self,
        plan: impl Fn(&[QueueItem], Option<&str>) -> Result<(Vec<Change>, T), OutboundError>,
    ) -> Result<T, OutboundError> {
        self.commit(|state| {
            let (changes, value) = plan(&state.items, state.in_flight.as_deref())?;
            Ok((apply_changes(state, changes)?, Vec::new(), value))
        })
    }

    /// Record that a create was applied remotely.
    ///
    /// Removes the item and rewrites every queued reference to its local id
    /// with `remote_id`, in one write.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn settle_create(&mut self, id: &str, remote_id: &str) -> Result<(), OutboundError> {
        self.commit(|state| {
            let items = state
                .items
                .iter()
                .filter(|i| i.id != id)
                .cloned()
                .map(|mut item| {
                    if item.depends_on_item(id) {
                        item.resolve(remote_id);
                    }
                    item
                })
                .collect();

            let mut next = QueueState {
                items,
                in_flight: state.in_flight.clone(),
            };
            next.release(id);
            Ok((next, Vec::new(), ()))
        })
    }

    /// Evict an item together with everything queued that depends on it.
    ///
    /// Returns the eviction records, root first.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is not queued or the write fails.
    pub fn evict_chain(
        &mut self,
        id: &str,
        class: FailureClass,
        reason: &str,
    ) -> Result<Vec<EvictionRecord>, OutboundError> {
        let now = Utc::now();

        self.commit(|state| {
            if state.position(id).is_none() {
                return Err(OutboundError::NotFound(format!("queue item {id}")));
            }

            let doomed = dependents_of(&state.items, id);
            let records: Vec<EvictionRecord> = state
                .items
                .iter()
                .filter(|i| doomed.contains(i.id.as_str()))
                .map(|item| {
                    let cascaded = item.id != id;
                    EvictionRecord {
                        id: None,
                        item_id: item.id.clone(),
                        entity: item.entity.clone(),
                        operation: item.operation,
                        target: item.target.clone(),
                        class,
                        reason: if cascaded {
                            format!("depends on evicted {id}: {reason}")
                        } else {
                            reason.to_string()
                        },
                        caused_by: cascaded.then(|| id.to_string()),
                        payload: item.payload.clone(),
                        enqueued_at: item.enqueued_at,
                        evicted_at: now,
                    }
                })
                .collect();

            // Root first, then dependents in queue order.
            let mut ordered: Vec<EvictionRecord> = Vec::with_capacity(records.len());
            ordered.extend(records.iter().filter(|r| r.caused_by.is_none()).cloned());
            ordered.extend(records.into_iter().filter(|r| r.caused_by.is_some()));

            let mut next = QueueState {
                items: state
                    .items
                    .iter()
                    .filter(|i| !doomed.contains(i.id.as_str()))
                    .cloned()
                    .collect(),
                in_flight: state.in_flight.clone(),
            };
            if next.in_flight.as_deref().is_some_and(|f| doomed.contains(f)) {
                next.in_flight = None;
            }

            Ok((next, ordered.clone(), ordered))
        })
    }

    /// Mark the item a drain is about to dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_in_flight(&mut self, id: &str) -> Result<(), OutboundError> {
        self.commit(|state| {
            let mut next = state.clone();
            next.in_flight = Some(id.to_string());
            Ok((next, Vec::new(), ()))
        })
    }

    /// Clear the in-flight marker.
    ///
    /// Settling, retrying or evicting the in-flight item clears it as part
    /// of the same write; this is for passes that end any other way.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn finish_in_flight(&mut self) -> Result<(), OutboundError> {
        self.commit(|state| {
            let mut next = state.clone();
            next.in_flight = None;
            Ok((next, Vec::new(), ()))
        })
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&str> {
        self.state.in_flight.as_deref()
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.state.items.len(),
            oldest_enqueued_at: self.state.items.iter().map(|i| i.enqueued_at).min(),
            in_flight: self.state.in_flight.clone(),
        }
    }

    /// Evicted operations awaiting dismissal.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn failures(&self) -> Result<Vec<EvictionRecord>, OutboundError> {
        self.backend.evictions()
    }

    /// Dismiss one eviction record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn dismiss(&mut self, id: i64) -> Result<bool, OutboundError> {
        Ok(self.backend.dismiss(Some(id))? > 0)
    }

    /// Dismiss every eviction record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn dismiss_all(&mut self) -> Result<usize, OutboundError> {
        self.backend.dismiss(None)
    }

    /// Run `plan` against the current state and persist the result.
    ///
    /// A plan that changes nothing is not written. A write that lost a race
    /// reloads the stored state and plans again. A failed write leaves the
    /// in-memory state as it was before the attempt.
    fn commit<T>(
        &mut self,
        plan: impl Fn(&QueueState) -> Result<Planned<T>, OutboundError>,
    ) -> Result<T, OutboundError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let (next, evicted, value) = plan(&self.state)?;
            if next == self.state && evicted.is_empty() {
                return Ok(value);
            }

            let stored = encode(&next, self.revision)?;
            match self.backend.save(&stored, &evicted) {
                Ok(Some(revision)) => {
                    self.state = next;
                    self.revision = revision;
                    return Ok(value);
                }
                Ok(None) => {
                    tracing::debug!(
                        revision = self.revision,
                        "queue changed by another writer, planning again"
                    );
                    self.refresh()?;
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue write failed, keeping previous state");
                    return Err(e);
                }
            }
        }

        Err(OutboundError::StorageWrite(format!(
            "queue kept changing under other writers after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }
}

/// Ids of `root` and every item that transitively waits on it.
#[must_use]
pub fn dependents_of<'a>(items: &'a [QueueItem], root: &'a str) -> HashSet<&'a str> {
    let mut found: HashSet<&str> = HashSet::from([root]);
    // Dependents always sit behind what they depend on, so one forward
    // pass reaches the whole chain.
    for item in items {
        if let Some(parent) = item.unresolved() {
            if found.contains(parent) {
                found.insert(item.id.as_str());
            }
        }
    }
    found
}

fn apply_changes(state: &QueueState, changes: Vec<Change>) -> Result<QueueState, OutboundError> {
    let mut next = state.clone();
    for change in changes {
        match change {
            Change::Append(item) => {
                if next.position(&item.id).is_some() {
                    return Err(OutboundError::InvalidAction(format!(
                        "queue item {} already exists",
                        item.id
                    )));
                }
                next.items.push(item);
            }
            Change::Amend { id, fields } => {
                let item = next
                    .items
                    .iter_mut()
                    .find(|i| i.id == id)
                    .ok_or_else(|| OutboundError::NotFound(format!("queue item {id}")))?;
                item.payload.extend(fields);
            }
            Change::Drop(id) => next.items.retain(|i| i.id != id),
        }
    }
    Ok(next)
}

fn encode(state: &QueueState, revision: i64) -> Result<StoredQueue, OutboundError> {
    let envelope = Envelope {
        version: QUEUE_FORMAT_VERSION,
        items: state.items.clone(),
        in_flight: state.in_flight.clone(),
    };
    let body = serde_json::to_string(&envelope)
        .map_err(|e| OutboundError::StorageWrite(format!("Failed to encode queue: {e}")))?;

    Ok(StoredQueue {
        format_version: QUEUE_FORMAT_VERSION,
        revision,
        body,
    })
}

fn decode(stored: &StoredQueue) -> Result<QueueState, OutboundError> {
    if stored.format_version > QUEUE_FORMAT_VERSION {
        return Err(OutboundError::UnsupportedFormat {
            found: stored.format_version,
            supported: QUEUE_FORMAT_VERSION,
        });
    }

    if stored.format_version < QUEUE_FORMAT_VERSION {
        tracing::warn!(
            found = stored.format_version,
            supported = QUEUE_FORMAT_VERSION,
            "discarding queue written by an older format"
        );
        return Ok(QueueState::default());
    }

    let envelope: Envelope = serde_json::from_str(&stored.body)
        .map_err(|e| OutboundError::Database(format!("Corrupt queue envelope: {e}")))?;

    if envelope.version != stored.format_version {
        return Err(OutboundError::Database(format!(
            "Queue envelope version {} does not match stored version {}",
            envelope.version, stored.format_version
        )));
    }

    Ok(QueueState {
        items: envelope.items,
        in_flight: envelope.in_flight,
    })
}
