//! Small cross-cutting helpers shared by the ledger and ingestor crates.

pub mod config;
pub mod env;
