//! Licita Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging bootstrap and error handling for the Licita workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`LicitaError`] and the [`Result`] alias
//! - **Logging**: environment-driven `tracing` subscriber setup
//! - **Types**: the canonical contract record and run statistics handed to sinks
//!
//! # Example
//!
//! ```no_run
//! use licita_common::logging::{init_logging, LogConfig};
//! use licita_common::types::ProcessingStats;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let stats = ProcessingStats::default();
//!     tracing::info!(success_rate = stats.success_rate(), "nothing processed yet");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{LicitaError, Result};
pub use types::{ContractDto, ContractStatus, ContractType, ProcedureType, ProcessingStats};
