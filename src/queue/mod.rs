//! Durable queue of pending remote mutations.
//!
//! The queue is the single source of truth for work that has not yet been
//! applied remotely. It survives restarts and is only mutated through
//! [`QueueStore`].

mod backend;
mod item;
mod store;

pub use backend::{EvictionRecord, QueueBackend, SqliteBackend, StoredQueue};
#[cfg(test)]
pub use backend::MockQueueBackend;
pub use item::{
    is_local_id, new_local_id, Dependency, EntityKind, OperationKind, Payload, QueueItem, RefSlot,
    LOCAL_ID_PREFIX,
};
pub use store::{dependents_of, Change, QueueSnapshot, QueueStore, QUEUE_FORMAT_VERSION};
