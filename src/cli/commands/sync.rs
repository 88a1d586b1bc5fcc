//! Sync commands: one forced pass, or a long-running watch.

use std::time::Duration;

use colored::Colorize;

use crate::cli::args::OutputFormat;
use crate::error::OutboundError;
use crate::output::{format_report, format_report_pretty, to_json};
use crate::sync::{DrainReport, DrainStop};

use super::Context;

/// Probe the remote, then run one drain pass.
///
/// When the remote is unreachable nothing is sent and the report says so.
///
/// # Errors
///
/// Returns an error if no remote is configured or the queue cannot be
/// written.
pub async fn sync(ctx: &Context) -> Result<String, OutboundError> {
    let (engine, remote) = ctx.engine()?;

    let online = remote.probe().await;
    engine.set_online(online);
    if !online {
        tracing::info!(url = %remote.base_url(), "remote unreachable");
    }

    let report = engine.sync_now().await?;
    format_report(&report, ctx.format)
}

#[derive(Default)]
struct WatchTotals {
    passes: usize,
    applied: usize,
    evicted: usize,
}

impl WatchTotals {
    fn add(&mut self, report: &DrainReport) {
        self.passes += 1;
        self.applied += report.applied.len();
        self.evicted += report.evicted.len();
    }
}

/// Probe the remote periodically and drain on every offline→online edge
/// until Ctrl-C.
///
/// # Errors
///
/// Returns an error if no remote is configured, the queue cannot be opened,
/// or the Ctrl-C handler cannot be installed.
pub async fn watch(ctx: &Context, interval: Option<u64>) -> Result<String, OutboundError> {
    let (engine, remote) = ctx.engine()?;
    let period = Duration::from_secs(
        interval
            .unwrap_or(ctx.config.connectivity.probe_interval_secs)
            .max(1),
    );

    let monitor = engine.spawn_monitor();
    let mut reports = monitor.subscribe_reports();
    let mut ticker = tokio::time::interval(period);
    let mut totals = WatchTotals::default();

    if ctx.format == OutputFormat::Pretty {
        println!(
            "{} {} {}",
            "Watching".bold(),
            remote.base_url(),
            format!("(probe every {}s, Ctrl-C to stop)", period.as_secs()).dimmed()
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }

            _ = ticker.tick() => {
                let online = remote.probe().await;
                if engine.set_online(online) {
                    print_connectivity(online, ctx.format)?;
                }
            }

            Ok(report) = reports.recv() => {
                totals.add(&report);
                print_report(&report, ctx.format)?;
            }
        }
    }

    monitor.shutdown().await;

    let pending = engine.snapshot().await.pending;
    match ctx.format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "passes": totals.passes,
            "applied": totals.applied,
            "evicted": totals.evicted,
            "pending": pending,
        })),
        OutputFormat::Pretty => Ok(format!(
            "Stopped after {} passes: {} applied, {} failed, {} still pending",
            totals.passes, totals.applied, totals.evicted, pending
        )),
    }
}

fn print_connectivity(online: bool, format: OutputFormat) -> Result<(), OutboundError> {
    match format {
        OutputFormat::Json => {
            let state = if online { "online" } else { "offline" };
            println!("{}", serde_json::to_string(&serde_json::json!({ "connectivity": state }))?);
        }
        OutputFormat::Pretty => {
            if online {
                println!("{} remote reachable", "●".green());
            } else {
                println!("{} remote unreachable", "●".red());
            }
        }
    }
    Ok(())
}

fn print_report(report: &DrainReport, format: OutputFormat) -> Result<(), OutboundError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Pretty => {
            // Quiet passes only clutter a long-running watch.
            if report.is_empty() && report.stop == DrainStop::Drained {
                return Ok(());
            }
            println!("{}", format_report_pretty(report));
        }
    }
    Ok(())
}
