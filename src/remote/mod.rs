//! Remote persistence service.
//!
//! The engine only needs three primitives per collection: create, update and
//! delete. [`RemoteService`] is the seam; [`HttpRemote`] talks to a REST
//! endpoint.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{EntityKind, Payload};

pub use http::HttpRemote;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// The remote answered with a server-side failure.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The remote rejected the payload.
    #[error("Validation rejected: {0}")]
    Validation(String),

    /// The referenced record no longer exists.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record changed remotely.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl RemoteError {
    /// Classify the failure for the retry policy.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Network(_) | Self::Timeout => FailureClass::TransientNetwork,
            Self::Server { .. } => FailureClass::TransientServer,
            Self::Validation(_) => FailureClass::Validation,
            Self::NotFound(_) => FailureClass::Gone,
            Self::Conflict(_) => FailureClass::Conflict,
        }
    }
}

/// Failure classes understood by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Unreachable network or timed-out request.
    TransientNetwork,
    /// 5xx and other server hiccups.
    TransientServer,
    /// The payload was rejected.
    Validation,
    /// The record changed remotely.
    Conflict,
    /// The referenced record no longer exists.
    Gone,
}

impl FailureClass {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork | Self::TransientServer)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::TransientServer => "transient_server",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Gone => "gone",
        }
    }

    /// Parse the stored name.
    #[must_use]
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "transient_network" => Some(Self::TransientNetwork),
            "transient_server" => Some(Self::TransientServer),
            "validation" => Some(Self::Validation),
            "conflict" => Some(Self::Conflict),
            "gone" => Some(Self::Gone),
            _ => None,
        }
    }

    /// Message shown to the user when an item of this class is evicted.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "could not reach the server",
            Self::TransientServer => "the server kept failing",
            Self::Validation => "the server rejected the data",
            Self::Conflict => "record changed remotely",
            Self::Gone => "record no longer exists",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote store the queue is replayed against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create a record and return its server-assigned id.
    async fn create(&self, entity: &EntityKind, payload: &Payload) -> Result<String, RemoteError>;

    /// Overwrite the given fields of an existing record.
    async fn update(
        &self,
        entity: &EntityKind,
        id: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError>;

    /// Delete an existing record.
    async fn delete(&self, entity: &EntityKind, id: &str) -> Result<(), RemoteError>;
}
