//! Storage layer for outbound.
//!
//! This module provides SQLite-based persistence for:
//! - The pending operation queue (one versioned envelope)
//! - The eviction log (operations that permanently failed)

mod database;
mod migrations;

pub use database::Database;
