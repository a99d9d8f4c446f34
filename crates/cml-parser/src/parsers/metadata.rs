//! Link metadata (`cml_metadata_*.csv`)
//!
//! Every row must carry valid site coordinates; a single bad value fails the
//! whole file so a metadata upload is applied all-or-nothing.

use cml_common::types::{normalize_identifier, validate_latitude, validate_longitude};
use cml_common::types::{GeoPoint, LinkMetadata};
use cml_common::CmlError;

use super::{
    cell, is_null_marker, line_of, name_matches, open_table, parse_optional_number, FileKind,
    ParsedFile, ParserEntry,
};
use crate::error::ParseError;

pub const COLUMNS: [&str; 9] = [
    "link_id",
    "sublink_id",
    "site_0_longitude",
    "site_0_latitude",
    "site_1_longitude",
    "site_1_latitude",
    "frequency",
    "polarization",
    "length",
];

pub fn entry() -> ParserEntry {
    ParserEntry {
        kind: FileKind::Metadata,
        matches,
        parse: parse_file,
    }
}

fn parse_file(bytes: &[u8]) -> Result<ParsedFile, ParseError> {
    parse(bytes).map(ParsedFile::Metadata)
}

pub fn matches(file_name: &str) -> bool {
    name_matches(file_name, "cml_metadata_", ".csv")
}

#[derive(Clone, Copy)]
enum Axis {
    Longitude,
    Latitude,
}

/// Parse a metadata file into validated link records
pub fn parse(bytes: &[u8]) -> Result<Vec<LinkMetadata>, ParseError> {
    let (idx, records) = open_table(bytes, &COLUMNS)?;

    let mut links = Vec::new();
    for (ordinal, record) in records.enumerate() {
        let record = record.map_err(|e| ParseError::malformed(&e))?;
        let line = line_of(&record, ordinal);
        let value = |i: usize| cell(&record, idx[i]);

        let site_0 = GeoPoint {
            longitude: coordinate(value(2), COLUMNS[2], Axis::Longitude, line)?,
            latitude: coordinate(value(3), COLUMNS[3], Axis::Latitude, line)?,
        };
        let site_1 = GeoPoint {
            longitude: coordinate(value(4), COLUMNS[4], Axis::Longitude, line)?,
            latitude: coordinate(value(5), COLUMNS[5], Axis::Latitude, line)?,
        };

        let polarization = value(7);
        links.push(LinkMetadata {
            link_id: identifier(value(0), "link_id", line)?,
            sublink_id: identifier(value(1), "sublink_id", line)?,
            site_0,
            site_1,
            frequency: parse_optional_number(value(6), "frequency", line)?,
            polarization: (!is_null_marker(polarization)).then(|| polarization.to_string()),
            length: parse_optional_number(value(8), "length", line)?,
        });
    }

    if links.is_empty() {
        return Err(ParseError::Empty);
    }

    tracing::debug!(rows = links.len(), "Parsed metadata file");
    Ok(links)
}

fn identifier(raw: &str, column: &'static str, line: u64) -> Result<String, ParseError> {
    normalize_identifier(raw, column).map_err(|_| ParseError::MissingValue { column, line })
}

fn coordinate(raw: &str, column: &'static str, axis: Axis, line: u64) -> Result<f64, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::MissingValue { column, line });
    }

    // NaN and non-numeric text are range failures, not nulls
    let value = raw.parse::<f64>().unwrap_or(f64::NAN);
    let checked: Result<f64, CmlError> = match axis {
        Axis::Longitude => validate_longitude(value),
        Axis::Latitude => validate_latitude(value),
    };

    checked.map_err(|source| ParseError::Coordinate {
        column,
        line,
        source,
    })
}
