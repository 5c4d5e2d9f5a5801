//! Licita Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ingestion of Spanish public-procurement publications into canonical
//! contract records.
//!
//! # Supported Sources
//!
//! - **PLACSP**: monthly syndication archives of the public-sector
//!   contracting platform, in both the legacy licitacion and the CODICE
//!   document formats
//! - **BOE**: daily summaries of the official state bulletin
//!
//! # Pipeline
//!
//! 1. [`discovery`] finds the archives published since a date
//! 2. [`archive`] and [`feed`] download containers and decode their feeds
//! 3. [`extract`] turns each entry into a format-neutral record
//! 4. [`normalize`] maps records onto [`licita_common::ContractDto`]
//! 5. [`pipeline`] runs all of the above concurrently and hands results to a
//!    [`sink::ContractSink`]
//!
//! # Example
//!
//! ```no_run
//! use licita_ingest::{HttpClient, IngestConfig, IngestRunner, MemorySink, SourceRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let http = Arc::new(HttpClient::new(config.http.clone())?);
//!     let registry = SourceRegistry::with_defaults(&config, http)?;
//!     let sink = MemorySink::new();
//!
//!     let reports = IngestRunner::new(&config)
//!         .run_all(&registry, &["placsp".to_string()], None, &sink)
//!         .await?;
//!     println!("{} contracts", reports[0].contracts);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod feed;
pub mod framework;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod sources;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use framework::HttpClient;
pub use pipeline::IngestRunner;
pub use registry::SourceRegistry;
pub use sink::{ContractSink, JsonLinesSink, MemorySink};
pub use sources::Source;
