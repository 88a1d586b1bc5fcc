//! JSON output formatting for outbound.

use serde::Serialize;
use serde_json::json;

use crate::error::OutboundError;
use crate::queue::{EvictionRecord, QueueItem, QueueSnapshot};
use crate::sync::Resolution;

/// Format queue status as JSON
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_status_json(snapshot: &QueueSnapshot, failed: usize) -> Result<String, OutboundError> {
    let output = json!({
        "pending": snapshot.pending,
        "oldest_pending": snapshot.oldest_enqueued_at.map(|t| t.to_rfc3339()),
        "failed": failed,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format pending items as JSON
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_items_json(items: &[QueueItem]) -> Result<String, OutboundError> {
    let output = json!({
        "count": items.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format the outcome of a recorded action as JSON
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_resolution_json(resolution: &Resolution) -> Result<String, OutboundError> {
    let queued: Vec<&QueueItem> = resolution.appended().collect();
    let output = json!({
        "result": resolution.kind,
        "record_id": resolution.record_id,
        "child_ids": resolution.child_ids,
        "queued": queued,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format evicted operations as JSON
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_failures_json(records: &[EvictionRecord]) -> Result<String, OutboundError> {
    let output = json!({
        "count": records.len(),
        "items": records
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Serialize any value to pretty JSON.
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, OutboundError> {
    Ok(serde_json::to_string_pretty(value)?)
}
