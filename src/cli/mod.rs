//! Command-line interface for outbound.

pub mod args;
pub mod commands;
