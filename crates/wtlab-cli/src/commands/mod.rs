//! CLI subcommand implementations.

pub mod connect;
pub mod fingerprint;
