use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::queue::{EvictionRecord, OperationKind, QueueItem, QueueSnapshot};
use crate::sync::{DrainReport, DrainStop, Resolution, ResolutionKind};

/// Relative age such as `3 minutes ago`.
#[must_use]
pub fn age_label(at: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(at);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn operation_label(operation: OperationKind) -> colored::ColoredString {
    match operation {
        OperationKind::Create => "create".green(),
        OperationKind::Update => "update".yellow(),
        OperationKind::Delete => "delete".red(),
    }
}

/// Format queue status
pub fn format_status_pretty(snapshot: &QueueSnapshot, failed: usize) -> String {
    let mut lines = Vec::new();

    lines.push("Outbound Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:    {} {}",
        snapshot.pending,
        if snapshot.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));

    lines.push(format!(
        "  Failed:     {} {}",
        failed,
        if failed > 0 {
            "operations need attention".red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = snapshot.oldest_enqueued_at {
        lines.push(format!("  Oldest:     {}", age_label(oldest).dimmed()));
    }

    if snapshot.pending > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'outbound sync' to replay pending operations"
                .dimmed()
                .to_string(),
        );
    }
    if failed > 0 {
        lines.push("Run 'outbound failed' to see what went wrong".dimmed().to_string());
    }

    lines.join("\n")
}

/// Format pending items in replay order
pub fn format_items_pretty(items: &[QueueItem]) -> String {
    if items.is_empty() {
        return "Pending (0 items)\n  Nothing to sync".to_string();
    }

    let mut output = format!("Pending ({} items)\n", items.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for (position, item) in items.iter().enumerate() {
        let mut line = format!(
            "{:>3}. {} {}",
            position + 1,
            operation_label(item.operation),
            item.entity.as_str().bold()
        );

        if let Some(target) = &item.target {
            line.push_str(&format!(" {target}"));
        }
        if let Some(parent) = item.unresolved() {
            line.push_str(&format!("  {}", format!("waits on {parent}").cyan()));
        }
        line.push_str(&format!("  {}", age_label(item.enqueued_at).dimmed()));
        if item.attempt_count > 0 {
            line.push_str(&format!(
                "  {}",
                format!("{} failed attempts", item.attempt_count).yellow()
            ));
        }

        output.push_str(&line);
        output.push('\n');
        output.push_str(&format!("     {}\n", item.id.dimmed()));
        if let Some(error) = &item.last_error {
            output.push_str(&format!("     {}\n", error.yellow()));
        }
    }

    output
}

/// Format the outcome of a recorded action
pub fn format_resolution_pretty(resolution: &Resolution) -> String {
    let record = resolution.record_id.as_deref().unwrap_or("");

    match resolution.kind {
        ResolutionKind::Queued => {
            let count = resolution.appended().count();
            let mut output = format!(
                "{} Queued {} {}",
                "✓".green(),
                count,
                if count == 1 { "operation" } else { "operations" }
            );
            if !record.is_empty() {
                output.push_str(&format!("\n  {}: {record}", "Local ID".dimmed()));
            }
            if !resolution.child_ids.is_empty() {
                output.push_str(&format!(
                    "\n  {}: {}",
                    "Child rows".dimmed(),
                    resolution.child_ids.len()
                ));
            }
            output
        }
        ResolutionKind::Folded => {
            format!("{} Merged into pending create {record}", "✓".green())
        }
        ResolutionKind::Cancelled => format!(
            "{} Cancelled pending create {record} ({} operations dropped)",
            "✓".green(),
            resolution.changes.len()
        ),
    }
}

/// Format one eviction as a notification line
pub fn format_eviction_pretty(record: &EvictionRecord) -> String {
    let mut line = format!(
        "{} {} {}",
        "✗".red(),
        operation_label(record.operation),
        record.entity.as_str().bold()
    );
    if let Some(target) = &record.target {
        line.push_str(&format!(" {target}"));
    }
    line.push_str(&format!(": {}", record.reason));
    line
}

/// Format a drain report
pub fn format_report_pretty(report: &DrainReport) -> String {
    let mut lines = Vec::new();

    for applied in &report.applied {
        let mut line = format!(
            "{} {} {}",
            "✓".green(),
            operation_label(applied.operation),
            applied.entity.as_str().bold()
        );
        if let Some(remote_id) = &applied.remote_id {
            line.push_str(&format!(" {}", remote_id.cyan()));
        }
        lines.push(line);
    }

    for record in &report.evicted {
        lines.push(format_eviction_pretty(record));
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }

    let summary = format!(
        "Sync: {} applied, {} failed",
        report.applied.len().to_string().green(),
        if report.evicted.is_empty() {
            "0".normal()
        } else {
            report.evicted.len().to_string().red()
        }
    );
    lines.push(summary);

    let stop = match &report.stop {
        DrainStop::Drained => "Queue is empty".dimmed().to_string(),
        DrainStop::Retrying { item_id, attempt } => format!(
            "{} {item_id} failed (attempt {attempt}), will retry on the next pass",
            "Stopped:".yellow()
        ),
        DrainStop::DependencyUnsatisfied { item_id, local_id } => format!(
            "{} {item_id} waits on {local_id}, which was never synced",
            "Stopped:".yellow()
        ),
        DrainStop::Offline => format!("{} remote unreachable", "Stopped:".yellow()),
        DrainStop::Coalesced => "A sync was already running".dimmed().to_string(),
    };
    lines.push(stop);

    lines.join("\n")
}

/// Format evicted operations
pub fn format_failures_pretty(records: &[EvictionRecord]) -> String {
    if records.is_empty() {
        return "Failed (0 items)\n  No failed operations".to_string();
    }

    let mut output = format!("Failed ({} items)\n", records.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for record in records {
        let id = record.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        output.push_str(&format!(
            "[{}] {}  {}\n",
            id.cyan(),
            format_eviction_pretty(record),
            age_label(record.evicted_at).dimmed()
        ));
        output.push_str(&format!("     {}: {}\n", "Class".dimmed(), record.class));
        if let Some(cause) = &record.caused_by {
            output.push_str(&format!("     {}: {cause}\n", "Caused by".dimmed()));
        }
        if !record.payload.is_empty() {
            let payload = serde_json::to_string(&record.payload).unwrap_or_default();
            output.push_str(&format!("     {}: {}\n", "Payload".dimmed(), payload.dimmed()));
        }
    }

    output.push_str(&"Run 'outbound dismiss <id>' once handled".dimmed().to_string());
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EntityKind, Payload};
    use crate::remote::FailureClass;
    use crate::sync::AppliedItem;
    use chrono::Duration;

    fn kind(name: &str) -> EntityKind {
        EntityKind::new(name).unwrap()
    }

    fn eviction() -> EvictionRecord {
        EvictionRecord {
            id: Some(4),
            item_id: "local-1".to_string(),
            entity: kind("inspection"),
            operation: OperationKind::Update,
            target: Some("srv-1".to_string()),
            class: FailureClass::Gone,
            reason: "record no longer exists: srv-1".to_string(),
            caused_by: None,
            payload: Payload::new(),
            enqueued_at: Utc::now(),
            evicted_at: Utc::now(),
        }
    }

    #[test]
    fn test_age_label() {
        assert_eq!(age_label(Utc::now()), "just now");
        assert_eq!(age_label(Utc::now() - Duration::minutes(3)), "3 minutes ago");
        assert_eq!(age_label(Utc::now() - Duration::hours(5)), "5 hours ago");
        assert_eq!(age_label(Utc::now() - Duration::days(2)), "2 days ago");
    }

    #[test]
    fn test_format_status_empty() {
        let snapshot = QueueSnapshot {
            pending: 0,
            oldest_enqueued_at: None,
            in_flight: None,
        };

        let output = format_status_pretty(&snapshot, 0);

        assert!(output.contains("Pending:    0"));
        assert!(!output.contains("outbound sync"));
    }

    #[test]
    fn test_format_items_empty() {
        assert!(format_items_pretty(&[]).contains("0 items"));
    }

    #[test]
    fn test_format_items_shows_dependency() {
        let child = QueueItem::create_child(kind("inspection_items"), Payload::new(), "local-7", "inspection_id");

        let output = format_items_pretty(&[child]);

        assert!(output.contains("inspection_items"));
        assert!(output.contains("waits on local-7"));
    }

    #[test]
    fn test_format_failures_lists_reason() {
        let output = format_failures_pretty(&[eviction()]);

        assert!(output.contains("Failed (1 items)"));
        assert!(output.contains("record no longer exists"));
        assert!(output.contains("gone"));
    }

    #[test]
    fn test_format_report() {
        let report = DrainReport {
            applied: vec![AppliedItem {
                item_id: "local-1".to_string(),
                entity: kind("inspection"),
                operation: OperationKind::Create,
                remote_id: Some("srv-1".to_string()),
            }],
            evicted: vec![eviction()],
            stop: DrainStop::Drained,
        };

        let output = format_report_pretty(&report);

        assert!(output.contains("srv-1"));
        assert!(output.contains("Queue is empty"));
        assert!(output.contains("record no longer exists"));
    }
}
