//! Configuration management for outbound.
//!
//! This module handles loading configuration from `~/.outbound/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{Config, ConnectivityConfig, GeneralConfig, RemoteConfig, SyncConfig};
