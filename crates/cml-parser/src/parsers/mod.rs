//! Format parsers and the registry that dispatches to them
//!
//! A parser is a pair of plain functions: a filename predicate and a parse
//! function from file bytes to a validated record set. Both are pure, so the
//! registry is a static ordered list built once at startup.

pub mod metadata;
pub mod rawdata;
pub mod registry;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use cml_common::types::{LinkMetadata, RawSample};

use crate::error::ParseError;

pub use registry::ParserRegistry;

/// The formats the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    RawData,
    Metadata,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::RawData => "rawdata",
            FileKind::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated contents of one file
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFile {
    Metadata(Vec<LinkMetadata>),
    RawData(Vec<RawSample>),
}

impl ParsedFile {
    pub fn len(&self) -> usize {
        match self {
            ParsedFile::Metadata(rows) => rows.len(),
            ParsedFile::RawData(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filename predicate, given the bare file name
pub type MatchFn = fn(&str) -> bool;

/// Parse function from raw file bytes
pub type ParseFn = fn(&[u8]) -> Result<ParsedFile, ParseError>;

/// One registered format
#[derive(Debug, Clone, Copy)]
pub struct ParserEntry {
    pub kind: FileKind,
    pub matches: MatchFn,
    pub parse: ParseFn,
}

impl ParserEntry {
    pub fn parse(&self, bytes: &[u8]) -> Result<ParsedFile, ParseError> {
        (self.parse)(bytes)
    }
}

/// Case-insensitive `{prefix}*{suffix}` match on a file name
pub(crate) fn name_matches(file_name: &str, prefix: &str, suffix: &str) -> bool {
    let lower = file_name.to_lowercase();
    lower.len() >= prefix.len() + suffix.len()
        && lower.starts_with(prefix)
        && lower.ends_with(suffix)
}

// ============================================================================
// CSV helpers
// ============================================================================

/// Open a CSV table, failing on empty content or missing columns.
///
/// Returns the index of each required column, in the order given, and the
/// data records.
pub(crate) fn open_table<'a>(
    bytes: &'a [u8],
    required: &[&'static str],
) -> Result<(Vec<usize>, csv::StringRecordsIntoIter<&'a [u8]>), ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ParseError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::malformed(&e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let missing: Vec<String> = required
        .iter()
        .filter(|name| !headers.iter().any(|h| h == *name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingColumns(missing));
    }

    let indices = required
        .iter()
        .filter_map(|name| headers.iter().position(|h| h == name))
        .collect();

    Ok((indices, reader.into_records()))
}

/// 1-based line number of a record, falling back to the record ordinal
pub(crate) fn line_of(record: &csv::StringRecord, ordinal: usize) -> u64 {
    record
        .position()
        .map(|p| p.line())
        .unwrap_or(ordinal as u64 + 2)
}

/// Cell by column index; cells beyond the record are treated as empty
pub(crate) fn cell(record: &csv::StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or("").trim()
}

/// Markers that mean "no value" in exported tables
pub(crate) fn is_null_marker(value: &str) -> bool {
    value.is_empty()
        || ["nan", "na", "null", "none"]
            .iter()
            .any(|marker| value.eq_ignore_ascii_case(marker))
}

/// Lenient optional number: null markers and non-numeric text become `None`
pub(crate) fn parse_lenient_number(value: &str) -> Option<f64> {
    if is_null_marker(value) {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Strict optional number: null markers become `None`, other text is an error
pub(crate) fn parse_optional_number(
    value: &str,
    column: &'static str,
    line: u64,
) -> Result<Option<f64>, ParseError> {
    if is_null_marker(value) {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or_else(|| ParseError::InvalidNumber {
            column,
            line,
            value: value.to_string(),
        })
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M%#z",
    "%Y-%m-%dT%H:%M%#z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp cell. Naive values are taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    let naive = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))
        .unwrap_or(value);
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(ts.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
