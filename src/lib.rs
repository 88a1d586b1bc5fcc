//! outbound - an offline-first mutation queue.
//!
//! User actions are resolved into ordered create/update/delete operations,
//! persisted durably, and replayed against a remote REST service once it is
//! reachable. Child records wait for their parent's server-assigned id;
//! operations the server will never accept are evicted and reported.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::OutboundError;
pub use queue::{QueueItem, QueueStore};
pub use remote::{HttpRemote, RemoteError, RemoteService};
pub use sync::{Action, SyncEngine};
