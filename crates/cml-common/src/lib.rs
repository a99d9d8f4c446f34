//! CML Common Library
//!
//! Shared types, validation, and logging for the CML ingestion workspace.
//!
//! # Overview
//!
//! - **Types**: link metadata rows, raw signal-level samples, link keys
//! - **Error Handling**: domain validation errors
//! - **Logging**: one `tracing` bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use cml_common::types::GeoPoint;
//!
//! fn site() -> cml_common::Result<GeoPoint> {
//!     GeoPoint::new(13.3888, 52.5170)
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CmlError, Result};
