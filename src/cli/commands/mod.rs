//! Command implementations for outbound.

mod queue;
mod sync;

pub use queue::{clear, create, delete, dismiss, failed, list, status, update};
pub use sync::{sync, watch};

use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::args::{Cli, OutputFormat};
use crate::config::{Config, Paths};
use crate::error::OutboundError;
use crate::queue::{Payload, QueueStore};
use crate::remote::{HttpRemote, RemoteService};
use crate::sync::{Connectivity, RetryPolicy, SyncEngine};

/// Resolved paths, configuration and output format for one invocation.
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub format: OutputFormat,
}

impl Context {
    /// Load paths and configuration. An explicit `--output` wins over the
    /// configured default.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be resolved or the
    /// config file cannot be parsed.
    pub fn load(output: Option<OutputFormat>) -> Result<Self, OutboundError> {
        let paths = Paths::new()?;
        let config = Config::load_from_path(&paths.config_file)?;
        let format = output.unwrap_or(config.general.default_output);

        Ok(Self {
            paths,
            config,
            format,
        })
    }

    /// Open the durable queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the queue was
    /// written by a newer version.
    pub fn open_store(&self) -> Result<QueueStore, OutboundError> {
        self.paths.ensure_dirs()?;
        QueueStore::open_at(&self.paths.database)
    }

    /// Build the sync engine against the configured remote.
    ///
    /// The connectivity signal starts offline; callers feed it.
    ///
    /// # Errors
    ///
    /// Returns an error if no remote is configured or the queue cannot be
    /// opened.
    pub fn engine(&self) -> Result<(SyncEngine, Arc<HttpRemote>), OutboundError> {
        let remote = Arc::new(HttpRemote::new(&self.config.remote)?);
        let store = self.open_store()?;
        let service: Arc<dyn RemoteService> = remote.clone();
        let engine = SyncEngine::new(
            store,
            service,
            RetryPolicy::from_config(&self.config.sync),
            Connectivity::new(false),
        );
        Ok((engine, remote))
    }
}

/// Parse a JSON object given on the command line.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object.
pub fn parse_payload(text: &str) -> Result<Payload, OutboundError> {
    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(OutboundError::InvalidAction(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}

/// Parse a JSON array of objects given on the command line.
///
/// # Errors
///
/// Returns an error if the text is not an array of JSON objects.
pub fn parse_rows(text: &str) -> Result<Vec<Payload>, OutboundError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Array(rows) = value else {
        return Err(OutboundError::InvalidAction(
            "rows must be a JSON array of objects".to_string(),
        ));
    };

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(OutboundError::InvalidAction(format!(
                "row {index} is not a JSON object"
            ))),
        })
        .collect()
}

/// Generate a completion script for `shell`.
///
/// # Errors
///
/// Returns an error if the script is not valid UTF-8.
pub fn completions(shell: Shell) -> Result<String, OutboundError> {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "outbound", &mut buf);
    String::from_utf8(buf).map_err(|e| OutboundError::Config(format!("UTF-8 error: {e}")))
}
