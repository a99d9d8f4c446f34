//! Raw signal-level time series (`cml_data_*.csv`)

use cml_common::types::{normalize_identifier, RawSample};

use super::{
    cell, line_of, name_matches, open_table, parse_lenient_number, parse_timestamp, FileKind,
    ParsedFile, ParserEntry,
};
use crate::error::ParseError;

pub const COLUMNS: [&str; 5] = [
    "time",
    "link_id",
    "sublink_id",
    "transmitted_level",
    "received_level",
];

pub fn entry() -> ParserEntry {
    ParserEntry {
        kind: FileKind::RawData,
        matches,
        parse: parse_file,
    }
}

fn parse_file(bytes: &[u8]) -> Result<ParsedFile, ParseError> {
    parse(bytes).map(ParsedFile::RawData)
}

pub fn matches(file_name: &str) -> bool {
    name_matches(file_name, "cml_data_", ".csv")
}

/// Parse a raw data file.
///
/// Timestamps and identifiers are mandatory for every row; signal levels
/// that are missing or non-numeric become `None`.
pub fn parse(bytes: &[u8]) -> Result<Vec<RawSample>, ParseError> {
    let (idx, records) = open_table(bytes, &COLUMNS)?;
    let (time_col, link_col, sublink_col) = (idx[0], idx[1], idx[2]);
    let (tsl_col, rsl_col) = (idx[3], idx[4]);

    let mut samples = Vec::new();
    for (ordinal, record) in records.enumerate() {
        let record = record.map_err(|e| ParseError::malformed(&e))?;
        let line = line_of(&record, ordinal);

        let raw_time = cell(&record, time_col);
        let time = parse_timestamp(raw_time).ok_or_else(|| ParseError::InvalidTimestamp {
            line,
            value: raw_time.to_string(),
        })?;

        samples.push(RawSample {
            time,
            link_id: identifier(&record, link_col, "link_id", line)?,
            sublink_id: identifier(&record, sublink_col, "sublink_id", line)?,
            tsl: parse_lenient_number(cell(&record, tsl_col)),
            rsl: parse_lenient_number(cell(&record, rsl_col)),
        });
    }

    if samples.is_empty() {
        return Err(ParseError::Empty);
    }

    tracing::debug!(rows = samples.len(), "Parsed raw data file");
    Ok(samples)
}

fn identifier(
    record: &csv::StringRecord,
    index: usize,
    column: &'static str,
    line: u64,
) -> Result<String, ParseError> {
    normalize_identifier(cell(record, index), column)
        .map_err(|_| ParseError::MissingValue { column, line })
}
