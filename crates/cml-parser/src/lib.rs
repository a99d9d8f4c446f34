//! CML Parser Library
//!
//! File-based ingestion of Commercial Microwave Link telemetry.
//!
//! # Overview
//!
//! Files landing in the incoming directory are picked up by a watcher, parsed
//! by the format that claims their name, written to PostgreSQL and finally
//! moved to a date-partitioned archive. Any failure moves the file to a
//! quarantine directory next to a note describing the reason.
//!
//! - **Parsers**: raw signal-level time series (`cml_data_*.csv`) and link
//!   metadata (`cml_metadata_*.csv`), dispatched through [`parsers::ParserRegistry`]
//! - **Persistence**: idempotent metadata upserts, append-only samples, one
//!   transaction per file ([`db::DbWriter`])
//! - **File lifecycle**: archive / quarantine with cross-filesystem fallback
//!   ([`files::FileManager`])
//! - **Watcher**: creation events plus a size stabilization wait
//!   ([`watcher::DirectoryWatcher`])
//! - **Orchestration**: backlog sweep, watch loop, graceful shutdown
//!   ([`orchestrator::ParserService`])
//!
//! # Example
//!
//! ```no_run
//! use cml_parser::{config::Config, orchestrator::ParserService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     ParserService::new(config).run(shutdown, false).await?;
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod orchestrator;
pub mod parsers;
pub mod service;
pub mod watcher;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod test_support;

pub use config::Config;
pub use error::{FileError, ParseError, ProcessError, WatchError};
