use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "outbound")]
#[command(about = "Offline-first mutation queue with replay against a REST backend")]
#[command(long_about = "outbound - record changes offline, replay them when the network returns

Every create, update and delete is written to a durable local queue first
and replayed in order against the configured REST endpoint once it is
reachable. Child rows wait for their parent's server-assigned id.

QUICK START:
  outbound create inspection --payload '{\"date\":\"2025-01-01\"}'
  outbound status             Pending count and oldest item
  outbound sync               Replay the queue once
  outbound watch              Replay whenever connectivity returns

CONFIGURATION:
  ~/.outbound/config.yaml (or $OUTBOUND_HOME/config.yaml)

  remote:
    base_url: https://api.example.com/rest/v1
    token: ...

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to `general.default_output` from the config file.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue status
    ///
    /// Pending operations, age of the oldest one, and failures awaiting
    /// dismissal.
    #[command(alias = "st")]
    Status,

    /// List pending operations in replay order
    #[command(alias = "ls")]
    List,

    /// Queue a create, optionally with child rows
    ///
    /// Child rows are created after the parent, with `--parent-field` set to
    /// the parent's server-assigned id.
    ///
    /// # Examples
    ///
    ///   outbound create inspection --payload '{"date":"2025-01-01"}'
    ///   outbound create inspection --payload '{"date":"2025-01-01"}' \
    ///       --child-entity inspection_items --parent-field inspection_id \
    ///       --rows '[{"label":"brakes"},{"label":"tyres"}]'
    Create(CreateArgs),

    /// Queue an update of a record
    ///
    /// The id may be a remote id or the local id of a record that has not
    /// synced yet; in the latter case the change is merged into the pending
    /// create.
    Update {
        /// Collection name
        entity: String,

        /// Remote id, or local id of a pending record
        id: String,

        /// Fields to change, as a JSON object
        #[arg(long, short = 'p')]
        payload: String,
    },

    /// Queue a delete of a record
    ///
    /// Deleting a record that has not synced yet cancels its create and
    /// everything queued against it.
    #[command(alias = "rm")]
    Delete {
        /// Collection name
        entity: String,

        /// Remote id, or local id of a pending record
        id: String,
    },

    /// Replay the queue once
    ///
    /// Stops at the first item that fails transiently; it is retried on the
    /// next pass.
    Sync,

    /// Watch connectivity and replay whenever the remote becomes reachable
    ///
    /// Runs until interrupted with Ctrl-C.
    Watch {
        /// Seconds between reachability probes
        #[arg(long, short = 'i')]
        interval: Option<u64>,
    },

    /// List operations that were evicted from the queue
    #[command(alias = "failures")]
    Failed,

    /// Dismiss evicted operations
    Dismiss {
        /// Id of the failure to dismiss
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<i64>,

        /// Dismiss every failure
        #[arg(long)]
        all: bool,
    },

    /// Drop every pending operation without sending it
    Clear {
        /// Required: pending changes are lost
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    ///
    /// Example: outbound completions bash > ~/.bash_completion.d/outbound
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments for `create`.
#[derive(Args)]
pub struct CreateArgs {
    /// Collection name, e.g. `inspection`
    pub entity: String,

    /// Record fields, as a JSON object
    #[arg(long, short = 'p', default_value = "{}")]
    pub payload: String,

    /// Collection of the child rows
    #[arg(long, requires_all = ["parent_field", "rows"])]
    pub child_entity: Option<String>,

    /// Field of each child row that holds the parent id
    #[arg(long, requires = "child_entity")]
    pub parent_field: Option<String>,

    /// Child rows, as a JSON array of objects
    #[arg(long, requires = "child_entity")]
    pub rows: Option<String>,
}
