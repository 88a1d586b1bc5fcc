//! Queue item model.
//!
//! A [`QueueItem`] is one deferred mutation against a remote collection.
//! Items that depend on a record created earlier in the queue carry a
//! [`Dependency`]: the placeholder that must be swapped for the
//! server-assigned identifier before the item can be dispatched.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OutboundError;

/// Field-to-value mapping written to the remote service.
pub type Payload = serde_json::Map<String, Value>;

/// Prefix of locally generated identifiers.
pub const LOCAL_ID_PREFIX: &str = "local-";

static ENTITY_KIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]{0,63}$")
        .unwrap_or_else(|e| panic!("Invalid entity kind regex: {e}"))
});

/// Name of a remote collection, e.g. `inspection` or `inspection_items`.
///
/// Kinds are lowercase identifiers because they end up as URL path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKind(String);

impl EntityKind {
    /// Validate and wrap a collection name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a lowercase identifier.
    pub fn new(name: impl Into<String>) -> Result<Self, OutboundError> {
        let name = name.into();
        if ENTITY_KIND_RE.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(OutboundError::InvalidAction(format!(
                "invalid entity kind '{name}': expected a lowercase identifier"
            )))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityKind {
    type Error = OutboundError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.0
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse the lowercase name used in storage and on the command line.
    #[must_use]
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the placeholder for a not-yet-created record lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum RefSlot {
    /// A payload field, e.g. a child row's `inspection_id`.
    Field(String),
    /// The item's own `target`, for updates and deletes of a record whose
    /// create was already in flight when the action was recorded.
    Target,
}

/// Placeholder reference to a record created by an earlier queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Local id of the queued create this item waits on.
    pub local_id: String,
    pub slot: RefSlot,
}

/// A single deferred mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Locally generated id; for creates this is also the record's local id.
    pub id: String,
    pub entity: EntityKind,
    pub operation: OperationKind,
    #[serde(default)]
    pub payload: Payload,
    /// Remote record id for updates and deletes.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub depends_on: Option<Dependency>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Generate a fresh local identifier.
#[must_use]
pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Whether `id` was generated locally.
#[must_use]
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

impl QueueItem {
    fn new(entity: EntityKind, operation: OperationKind, payload: Payload) -> Self {
        Self {
            id: new_local_id(),
            entity,
            operation,
            payload,
            target: None,
            depends_on: None,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// A create of a new record.
    #[must_use]
    pub fn create(entity: EntityKind, payload: Payload) -> Self {
        Self::new(entity, OperationKind::Create, payload)
    }

    /// A create of a child row whose `field` must hold the parent's remote id.
    ///
    /// Until the parent is applied the field holds the parent's local id.
    #[must_use]
    pub fn create_child(
        entity: EntityKind,
        mut payload: Payload,
        parent_local_id: &str,
        field: &str,
    ) -> Self {
        payload.insert(field.to_string(), Value::String(parent_local_id.to_string()));
        let mut item = Self::new(entity, OperationKind::Create, payload);
        item.depends_on = Some(Dependency {
            local_id: parent_local_id.to_string(),
            slot: RefSlot::Field(field.to_string()),
        });
        item
    }

    /// An update of an existing remote record.
    #[must_use]
    pub fn update(entity: EntityKind, target: impl Into<String>, payload: Payload) -> Self {
        let mut item = Self::new(entity, OperationKind::Update, payload);
        item.target = Some(target.into());
        item
    }

    /// A delete of an existing remote record.
    #[must_use]
    pub fn delete(entity: EntityKind, target: impl Into<String>) -> Self {
        let mut item = Self::new(entity, OperationKind::Delete, Payload::new());
        item.target = Some(target.into());
        item
    }

    /// An update or delete of a record whose create is still in flight.
    #[must_use]
    pub fn pending_target(
        entity: EntityKind,
        operation: OperationKind,
        local_id: &str,
        payload: Payload,
    ) -> Self {
        let mut item = Self::new(entity, operation, payload);
        item.depends_on = Some(Dependency {
            local_id: local_id.to_string(),
            slot: RefSlot::Target,
        });
        item
    }

    #[must_use]
    pub fn is_create(&self) -> bool {
        self.operation == OperationKind::Create
    }

    /// Local id this item is still waiting on, if any.
    #[must_use]
    pub fn unresolved(&self) -> Option<&str> {
        self.depends_on.as_ref().map(|dep| dep.local_id.as_str())
    }

    /// Whether this item waits on the create with the given local id.
    #[must_use]
    pub fn depends_on_item(&self, local_id: &str) -> bool {
        self.unresolved() == Some(local_id)
    }

    /// Swap the placeholder for the server-assigned id.
    pub fn resolve(&mut self, remote_id: &str) {
        if let Some(dep) = self.depends_on.take() {
            match dep.slot {
                RefSlot::Field(field) => {
                    self.payload
                        .insert(field, Value::String(remote_id.to_string()));
                }
                RefSlot::Target => self.target = Some(remote_id.to_string()),
            }
        }
    }

    /// Short human label, e.g. `create inspection`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {} {target}", self.operation, self.entity),
            None => format!("{} {}", self.operation, self.entity),
        }
    }
}
