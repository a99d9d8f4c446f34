//! Shared helpers for database-backed tests
//!
//! Tests need a PostgreSQL database reachable through `TEST_DATABASE_URL`;
//! without it they log a line and return early.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use cml_common::types::{GeoPoint, LinkMetadata, RawSample};
use cml_parser::db::DbWriter;
use sqlx::postgres::PgPoolOptions;

pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Connect, migrate and empty both tables. `None` when no database is configured.
pub async fn setup_writer(batch_size: usize) -> Option<DbWriter> {
    let url = std::env::var(TEST_DATABASE_URL).ok()?;

    let pool = match PgPoolOptions::new().max_connections(2).connect(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to connect to test database: {}", e);
            return None;
        }
    };

    let writer = DbWriter::from_pool(pool, batch_size);
    writer
        .run_migrations()
        .await
        .expect("Migrations should apply");
    reset(&writer).await;

    Some(writer)
}

pub async fn reset(writer: &DbWriter) {
    sqlx::query("TRUNCATE cml_metadata, cml_data")
        .execute(writer.pool())
        .await
        .expect("Failed to truncate tables");
}

pub async fn count(writer: &DbWriter, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(writer.pool())
        .await
        .expect("Failed to count rows")
}

pub fn link(link_id: &str, sublink_id: &str, frequency: f64) -> LinkMetadata {
    LinkMetadata {
        link_id: link_id.to_string(),
        sublink_id: sublink_id.to_string(),
        site_0: GeoPoint::new(13.3888, 52.5170).unwrap(),
        site_1: GeoPoint::new(13.4050, 52.5200).unwrap(),
        frequency: Some(frequency),
        polarization: Some("H".to_string()),
        length: Some(1200.5),
    }
}

pub fn sample(link_id: &str, sublink_id: &str, minute: u32) -> RawSample {
    RawSample {
        time: at(minute),
        link_id: link_id.to_string(),
        sublink_id: sublink_id.to_string(),
        tsl: Some(10.0),
        rsl: Some(-45.5),
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, minute, 0).unwrap()
}

pub const METADATA_HEADER: &str = "link_id,sublink_id,site_0_longitude,site_0_latitude,\
                                   site_1_longitude,site_1_latitude,frequency,polarization,length";

pub const DATA_HEADER: &str = "time,link_id,sublink_id,transmitted_level,received_level";

pub fn csv(header: &str, rows: &[&str]) -> String {
    let mut body = format!("{}\n", header);
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}
