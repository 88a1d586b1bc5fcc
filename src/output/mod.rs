//! Output formatting for outbound.
//!
//! Every formatter renders either colored text for a terminal or pretty
//! JSON for scripting.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::OutboundError;
use crate::queue::{EvictionRecord, QueueItem, QueueSnapshot};
use crate::sync::{DrainReport, Resolution};

pub use json::*;
pub use pretty::*;

/// Format queue status based on output format
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_status(
    snapshot: &QueueSnapshot,
    failed: usize,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    match format {
        OutputFormat::Pretty => Ok(format_status_pretty(snapshot, failed)),
        OutputFormat::Json => format_status_json(snapshot, failed),
    }
}

/// Format pending items based on output format
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_items(items: &[QueueItem], format: OutputFormat) -> Result<String, OutboundError> {
    match format {
        OutputFormat::Pretty => Ok(format_items_pretty(items)),
        OutputFormat::Json => format_items_json(items),
    }
}

/// Format the outcome of a recorded action based on output format
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_resolution(
    resolution: &Resolution,
    format: OutputFormat,
) -> Result<String, OutboundError> {
    match format {
        OutputFormat::Pretty => Ok(format_resolution_pretty(resolution)),
        OutputFormat::Json => format_resolution_json(resolution),
    }
}

/// Format a drain report based on output format
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_report(report: &DrainReport, format: OutputFormat) -> Result<String, OutboundError> {
    match format {
        OutputFormat::Pretty => Ok(format_report_pretty(report)),
        OutputFormat::Json => to_json(report),
    }
}

/// Format evicted operations based on output format
///
/// # Errors
///
/// Returns `OutboundError::Parse` if JSON serialization fails.
pub fn format_failures(
    records: &[EvictionRecord],
    format: OutputFormat,
) -> Result<String, OutboundError> {
    match format {
        OutputFormat::Pretty => Ok(format_failures_pretty(records)),
        OutputFormat::Json => format_failures_json(records),
    }
}
