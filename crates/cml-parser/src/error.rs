//! Error types for the ingestion pipeline
//!
//! Each layer has its own enum. [`ProcessError`] is what a single file's
//! processing fails with; its `Display` text becomes the quarantine reason.

use std::path::PathBuf;

use cml_common::CmlError;
use thiserror::Error;

use crate::db::DbError;

/// Format parsing failures. Any of these fails the whole file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("File is empty or has no data rows")]
    Empty,

    #[error("Missing required columns: [{}]", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Malformed CSV at line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("Unparseable timestamp '{value}' at line {line}")]
    InvalidTimestamp { line: u64, value: String },

    #[error("Missing value for '{column}' at line {line}")]
    MissingValue { column: &'static str, line: u64 },

    #[error("Invalid number '{value}' for '{column}' at line {line}")]
    InvalidNumber {
        column: &'static str,
        line: u64,
        value: String,
    },

    #[error("Invalid coordinate in '{column}' at line {line}: {source}")]
    Coordinate {
        column: &'static str,
        line: u64,
        #[source]
        source: CmlError,
    },
}

impl ParseError {
    pub(crate) fn malformed(err: &csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        let message = match err.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => format!("expected {} fields, found {}", expected_len, len),
            csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {}", err),
            _ => err.to_string(),
        };
        Self::Malformed { line, message }
    }
}

/// File move failures (archive side; quarantine never fails)
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy of {} is incomplete: expected {expected} bytes, found {actual}", .path.display())]
    IncompleteCopy {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

impl FileError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Watcher setup failures
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watched directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Failure of one file's trip through the pipeline
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("no parser for file: {0}")]
    UnrecognizedFile(String),

    #[error("Failed to read file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Database write failed: {0}")]
    Database(#[from] DbError),

    #[error("Archive failed: {0}")]
    Archive(#[from] FileError),
}
