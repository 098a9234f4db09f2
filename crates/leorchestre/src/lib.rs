//! leorchestre - Pipeline Runner CLI
//!
//! *L'Orchestre* (The Orchestra) - Command-line front end for lepipeline:
//! TOML configuration, tracing setup and deterministic stub stage workers.

#![warn(missing_docs)]

/// Command-line interface
pub mod cli;

/// Configuration file loading
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Deterministic stub stage workers
pub mod stub;

pub use cli::Cli;
pub use stub::{StubPlan, StubWorker};
