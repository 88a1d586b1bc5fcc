//! Queue commands: recording actions and inspecting the queue.
//!
//! None of these touch the network.

use crate::cli::args::{CreateArgs, OutputFormat};
use crate::error::OutboundError;
use crate::output::{format_failures, format_items, format_resolution, format_status, to_json};
use crate::queue::{EntityKind, QueueStore};
use crate::sync::{record, Action, ChildRows};

use super::{parse_payload, parse_rows};

/// Show pending count, oldest item and failures.
///
/// # Errors
///
/// Returns an error if the eviction log cannot be read.
pub fn status(store: &QueueStore, format: OutputFormat) -> Result<String, OutboundError> {
    let failed = store.failures()?.len();
    format_status(&store.snapshot(), failed, format)
}

/// List pending operations.
///
/// # Errors
///
/// Returns an error if output formatting fails.
pub fn list(store: &QueueStore, format: OutputFormat) -> Result<String, OutboundError> {
    format_items(&store.list(), format)
}

/// Record a create, with optional child rows.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the queue cannot be
/// written.
pub fn create(
    store: &mut QueueStore,
    args: CreateArgs,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    let entity = EntityKind::new(args.entity)?;
    let payload = parse_payload(&args.payload)?;

    let mut action = Action::create(entity, payload);
    if let (Some(child_entity), Some(parent_field), Some(rows)) =
        (args.child_entity, args.parent_field, args.rows)
    {
        action = action.with_children(ChildRows {
            entity: EntityKind::new(child_entity)?,
            parent_field,
            rows: parse_rows(&rows)?,
        });
    }

    let resolution = record(store, action)?;
    format_resolution(&resolution, format)
}

/// Record an update.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the queue cannot be
/// written.
pub fn update(
    store: &mut QueueStore,
    entity: String,
    id: String,
    payload: &str,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    let action = Action::Update {
        entity: EntityKind::new(entity)?,
        id,
        payload: parse_payload(payload)?,
    };
    let resolution = record(store, action)?;
    format_resolution(&resolution, format)
}

/// Record a delete.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the queue cannot be
/// written.
pub fn delete(
    store: &mut QueueStore,
    entity: String,
    id: String,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    let action = Action::Delete {
        entity: EntityKind::new(entity)?,
        id,
    };
    let resolution = record(store, action)?;
    format_resolution(&resolution, format)
}

/// List evicted operations.
///
/// # Errors
///
/// Returns an error if the eviction log cannot be read.
pub fn failed(store: &QueueStore, format: OutputFormat) -> Result<String, OutboundError> {
    format_failures(&store.failures()?, format)
}

/// Dismiss one or all evicted operations.
///
/// # Errors
///
/// Returns an error if the id is unknown or the log cannot be written.
pub fn dismiss(
    store: &mut QueueStore,
    id: Option<i64>,
    all: bool,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    let count = match (id, all) {
        (_, true) => store.dismiss_all()?,
        (Some(id), false) => {
            if !store.dismiss(id)? {
                return Err(OutboundError::NotFound(format!("failure {id}")));
            }
            1
        }
        (None, false) => {
            return Err(OutboundError::InvalidAction(
                "Give a failure id or --all".to_string(),
            ))
        }
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "dismissed": count })),
        OutputFormat::Pretty => Ok(format!("Dismissed {count} failed operations")),
    }
}

/// Drop every pending operation.
///
/// # Errors
///
/// Returns an error without `--force` or if the queue cannot be written.
pub fn clear(
    store: &mut QueueStore,
    force: bool,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    if !force {
        return Err(OutboundError::Config(
            "Use --force to drop all pending operations".to_string(),
        ));
    }

    let count = store.len();
    store.clear()?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "cleared": count })),
        OutputFormat::Pretty => Ok(format!("Dropped {count} pending operations")),
    }
}
