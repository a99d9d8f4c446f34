//! Parser registry
//!
//! Maps a file name to the first registered parser whose predicate claims it.
//! Order is priority: raw data before metadata.

use std::path::Path;

use super::{metadata, rawdata, FileKind, ParserEntry};

/// Ordered, immutable list of known formats
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    entries: Vec<ParserEntry>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    /// Registry with the built-in raw data and metadata parsers
    pub fn new() -> Self {
        Self::with_parsers(vec![rawdata::entry(), metadata::entry()])
    }

    /// Registry with an explicit priority-ordered parser list
    pub fn with_parsers(entries: Vec<ParserEntry>) -> Self {
        Self { entries }
    }

    /// Append a parser at the lowest priority
    pub fn register(mut self, entry: ParserEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// First parser whose predicate matches the path's file name
    pub fn resolve(&self, path: &Path) -> Option<&ParserEntry> {
        let file_name = path.file_name()?.to_str()?;
        self.entries.iter().find(|entry| (entry.matches)(file_name))
    }

    /// Registered kinds in priority order
    pub fn kinds(&self) -> Vec<FileKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }
}
