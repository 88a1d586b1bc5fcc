//! Offline replay: resolving user actions into queue items, draining the
//! queue against the remote, and deciding what to do with failures.

pub mod connectivity;
pub mod engine;
pub mod policy;
pub mod processor;
pub mod resolver;

pub use connectivity::{Connectivity, ConnectivityEvent, ConnectivityMonitor, MonitorHandle};
pub use engine::{EngineStatus, EvictionFeed, SyncEngine};
pub use policy::{EvictReason, RetryPolicy, Verdict};
pub use processor::{AppliedItem, DrainReport, DrainStop, SyncEvent, SyncProcessor};
pub use resolver::{record, resolve, Action, ChildRows, Resolution, ResolutionKind};
