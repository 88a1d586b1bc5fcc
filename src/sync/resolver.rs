//! Composite-operation resolver.
//!
//! Turns one user action into queue changes:
//! - a create with child rows becomes the parent create followed by one
//!   create per child, each holding a placeholder for the parent's id;
//! - an update of a record whose create is still queued is folded into
//!   that create;
//! - a delete of a record whose create is still queued drops the create and
//!   everything waiting on it, so nothing is ever sent for that record.
//!
//! A create that is currently in flight can no longer be changed; actions
//! against it are queued behind it with a placeholder target instead.

use serde::{Deserialize, Serialize};

use crate::error::OutboundError;
use crate::queue::{
    dependents_of, is_local_id, Change, EntityKind, OperationKind, Payload, QueueItem, QueueStore,
    RefSlot,
};

/// Rows of one child collection created together with their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRows {
    pub entity: EntityKind,
    /// Field of each row that must hold the parent's id.
    pub parent_field: String,
    pub rows: Vec<Payload>,
}

/// A logical user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create {
        entity: EntityKind,
        payload: Payload,
        #[serde(default)]
        children: Vec<ChildRows>,
    },
    Update {
        entity: EntityKind,
        /// Remote id, or the local id of a record still queued.
        id: String,
        payload: Payload,
    },
    Delete {
        entity: EntityKind,
        id: String,
    },
}

impl Action {
    #[must_use]
    pub fn create(entity: EntityKind, payload: Payload) -> Self {
        Self::Create {
            entity,
            payload,
            children: Vec::new(),
        }
    }

    /// Attach child rows to a create action. No-op for other actions.
    #[must_use]
    pub fn with_children(mut self, child_rows: ChildRows) -> Self {
        if let Self::Create { children, .. } = &mut self {
            children.push(child_rows);
        }
        self
    }
}

/// How an action was absorbed into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// New items were appended.
    Queued,
    /// An update was merged into a queued create.
    Folded,
    /// A delete cancelled a queued create; nothing will be sent.
    Cancelled,
}

/// Result of resolving one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub changes: Vec<Change>,
    /// Local id of a created record, usable for optimistic local state.
    pub record_id: Option<String>,
    /// Local ids of created child rows, in row order.
    pub child_ids: Vec<String>,
}

impl Resolution {
    fn queued(changes: Vec<Change>) -> Self {
        Self {
            kind: ResolutionKind::Queued,
            changes,
            record_id: None,
            child_ids: Vec::new(),
        }
    }

    /// Items this resolution appends.
    pub fn appended(&self) -> impl Iterator<Item = &QueueItem> {
        self.changes.iter().filter_map(|change| match change {
            Change::Append(item) => Some(item),
            _ => None,
        })
    }
}

/// Resolve an action against the current queue.
///
/// `in_flight` is the id of the item currently being dispatched, if any.
///
/// # Errors
///
/// Returns an error if the action is malformed or targets a local record
/// that is no longer queued.
pub fn resolve(
    action: Action,
    queued: &[QueueItem],
    in_flight: Option<&str>,
) -> Result<Resolution, OutboundError> {
    match action {
        Action::Create {
            entity,
            payload,
            children,
        } => Ok(resolve_create(entity, payload, children)),
        Action::Update {
            entity,
            id,
            payload,
        } => resolve_update(entity, &id, payload, queued, in_flight),
        Action::Delete { entity, id } => resolve_delete(entity, &id, queued, in_flight),
    }
}

/// Resolve an action and apply it to the store in one write.
///
/// The action is resolved against the stored queue, including items queued
/// and in-flight markers set by other processes.
///
/// # Errors
///
/// Returns an error if the action cannot be resolved or the write fails.
pub fn record(store: &mut QueueStore, action: Action) -> Result<Resolution, OutboundError> {
    let resolution = store.apply_with(|queued, in_flight| {
        let resolution = resolve(action.clone(), queued, in_flight)?;
        Ok((resolution.changes.clone(), resolution))
    })?;

    tracing::debug!(
        kind = ?resolution.kind,
        changes = resolution.changes.len(),
        record = ?resolution.record_id,
        "action recorded"
    );

    Ok(resolution)
}

fn resolve_create(entity: EntityKind, payload: Payload, children: Vec<ChildRows>) -> Resolution {
    let parent = QueueItem::create(entity, payload);
    let parent_id = parent.id.clone();

    let mut changes = vec![Change::Append(parent)];
    let mut child_ids = Vec::new();

    for batch in children {
        for row in batch.rows {
            let child =
                QueueItem::create_child(batch.entity.clone(), row, &parent_id, &batch.parent_field);
            child_ids.push(child.id.clone());
            changes.push(Change::Append(child));
        }
    }

    Resolution {
        kind: ResolutionKind::Queued,
        changes,
        record_id: Some(parent_id),
        child_ids,
    }
}

fn resolve_update(
    entity: EntityKind,
    id: &str,
    payload: Payload,
    queued: &[QueueItem],
    in_flight: Option<&str>,
) -> Result<Resolution, OutboundError> {
    if payload.is_empty() {
        return Err(OutboundError::InvalidAction(format!(
            "update of {entity} {id} has no fields"
        )));
    }

    let Some(create) = pending_create(&entity, id, queued)? else {
        return Ok(Resolution::queued(vec![Change::Append(QueueItem::update(
            entity, id, payload,
        ))]));
    };

    if let Some(dep) = &create.depends_on {
        if let RefSlot::Field(field) = &dep.slot {
            if payload.contains_key(field) {
                return Err(OutboundError::InvalidAction(format!(
                    "cannot change '{field}' of {entity} {id} before it is synced"
                )));
            }
        }
    }

    if in_flight == Some(id) {
        let item = QueueItem::pending_target(entity, OperationKind::Update, id, payload);
        return Ok(Resolution::queued(vec![Change::Append(item)]));
    }

    Ok(Resolution {
        kind: ResolutionKind::Folded,
        changes: vec![Change::Amend {
            id: id.to_string(),
            fields: payload,
        }],
        record_id: Some(id.to_string()),
        child_ids: Vec::new(),
    })
}

fn resolve_delete(
    entity: EntityKind,
    id: &str,
    queued: &[QueueItem],
    in_flight: Option<&str>,
) -> Result<Resolution, OutboundError> {
    if pending_create(&entity, id, queued)?.is_none() {
        return Ok(Resolution::queued(vec![Change::Append(QueueItem::delete(
            entity, id,
        ))]));
    }

    let doomed = dependents_of(queued, id);

    if in_flight == Some(id) {
        // The create will land; delete it right after and drop whatever was
        // queued against it.
        let mut changes: Vec<Change> = queued
            .iter()
            .filter(|i| i.id != id && doomed.contains(i.id.as_str()))
            .map(|i| Change::Drop(i.id.clone()))
            .collect();
        changes.push(Change::Append(QueueItem::pending_target(
            entity,
            OperationKind::Delete,
            id,
            Payload::new(),
        )));
        return Ok(Resolution::queued(changes));
    }

    let changes = queued
        .iter()
        .filter(|i| doomed.contains(i.id.as_str()))
        .map(|i| Change::Drop(i.id.clone()))
        .collect();

    Ok(Resolution {
        kind: ResolutionKind::Cancelled,
        changes,
        record_id: Some(id.to_string()),
        child_ids: Vec::new(),
    })
}

/// The queued create for `id`, if the record has not reached the remote.
fn pending_create<'a>(
    entity: &EntityKind,
    id: &str,
    queued: &'a [QueueItem],
) -> Result<Option<&'a QueueItem>, OutboundError> {
    match queued.iter().find(|i| i.is_create() && i.id == id) {
        Some(create) if &create.entity != entity => Err(OutboundError::InvalidAction(format!(
            "{id} is a queued {}, not {entity}",
            create.entity
        ))),
        Some(create) => Ok(Some(create)),
        None if is_local_id(id) => Err(OutboundError::InvalidAction(format!(
            "{id} is not queued; it has either synced or been evicted, use its remote id"
        ))),
        None => Ok(None),
    }
}
