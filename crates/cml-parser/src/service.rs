//! Per-file processing
//!
//! Takes one ready file from `incoming` to exactly one terminal location:
//! parse, write, archive on success; quarantine with a reason on any failure.
//! Errors never escape [`FileProcessor::process`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use cml_common::types::{LinkKey, RawSample};
use tracing::{debug, error, info, warn};

use crate::db::CmlStore;
use crate::error::ProcessError;
use crate::files::FileManager;
use crate::parsers::{FileKind, ParsedFile, ParserRegistry};

/// How many missing keys a warning lists
pub const MISSING_REFERENCE_SAMPLE: usize = 10;

/// Terminal result of processing one path
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Archived {
        path: PathBuf,
        kind: FileKind,
        rows: u64,
    },
    Quarantined {
        path: PathBuf,
        reason: String,
    },
    /// The path was already gone at dispatch; nothing was done
    Vanished,
}

/// Running totals for a service run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub archived: usize,
    pub quarantined: usize,
    pub skipped: usize,
    pub rows_written: u64,
}

impl ProcessingStats {
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Archived { rows, .. } => {
                self.archived += 1;
                self.rows_written += rows;
            }
            FileOutcome::Quarantined { .. } => self.quarantined += 1,
            FileOutcome::Vanished => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.archived + self.quarantined + self.skipped
    }

    pub fn log_summary(&self, phase: &str) {
        info!(
            archived = self.archived,
            quarantined = self.quarantined,
            skipped = self.skipped,
            rows_written = self.rows_written,
            "{} summary: {} file(s) handled",
            phase,
            self.total()
        );
    }
}

/// Runs one file through registry, parser, store and file manager
pub struct FileProcessor<S> {
    registry: ParserRegistry,
    store: S,
    files: FileManager,
}

impl<S: CmlStore> FileProcessor<S> {
    pub fn new(registry: ParserRegistry, store: S, files: FileManager) -> Self {
        Self {
            registry,
            store,
            files,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Process `path` to completion
    pub async fn process(&self, path: &Path) -> FileOutcome {
        if !path.exists() {
            debug!(path = %path.display(), "File already handled, skipping");
            return FileOutcome::Vanished;
        }

        info!(path = %path.display(), "Processing file");

        let (kind, rows) = match self.ingest(path).await {
            Ok(written) => written,
            Err(e) => return self.quarantine(path, e),
        };

        match self.files.archive(path) {
            Ok(archived) => {
                info!(
                    kind = %kind,
                    rows,
                    path = %archived.display(),
                    "File processed successfully"
                );
                FileOutcome::Archived {
                    path: archived,
                    kind,
                    rows,
                }
            }
            Err(e) => self.quarantine(path, ProcessError::Archive(e)),
        }
    }

    async fn ingest(&self, path: &Path) -> Result<(FileKind, u64), ProcessError> {
        let entry = self.registry.resolve(path).ok_or_else(|| {
            ProcessError::UnrecognizedFile(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;

        let bytes = tokio::fs::read(path).await.map_err(ProcessError::Read)?;
        let parsed = entry.parse(&bytes)?;
        debug!(kind = %entry.kind, rows = parsed.len(), "Parsed file");

        let rows = match parsed {
            ParsedFile::Metadata(links) => self.store.write_metadata(&links).await?,
            ParsedFile::RawData(samples) => {
                self.check_references(path, &samples).await;
                self.store.write_timeseries(&samples).await?
            }
        };

        Ok((entry.kind, rows))
    }

    /// Log raw data keys with no metadata. Never blocks the write.
    async fn check_references(&self, path: &Path, samples: &[RawSample]) {
        match self.store.missing_references(samples).await {
            Ok(missing) if missing.is_empty() => {}
            Ok(missing) => {
                warn!(
                    path = %path.display(),
                    missing_count = missing.len(),
                    sample = %missing_reference_sample(&missing).join(", "),
                    "Raw data references links without metadata, writing anyway"
                );
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Reference check failed, writing anyway"
                );
            }
        }
    }

    fn quarantine(&self, path: &Path, err: ProcessError) -> FileOutcome {
        let reason = err.to_string();
        error!(path = %path.display(), error = %reason, "File processing failed");

        let destination = self.files.quarantine(path, &reason);
        FileOutcome::Quarantined {
            path: destination,
            reason,
        }
    }
}

/// First [`MISSING_REFERENCE_SAMPLE`] keys, rendered for logging
pub fn missing_reference_sample(missing: &BTreeSet<LinkKey>) -> Vec<String> {
    missing
        .iter()
        .take(MISSING_REFERENCE_SAMPLE)
        .map(ToString::to_string)
        .collect()
}
