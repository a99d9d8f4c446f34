//! PostgreSQL persistence for CML metadata and raw samples
//!
//! Every call that writes runs in one transaction: the chunks of a file are
//! committed together or not at all.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use cml_common::types::{LinkKey, LinkMetadata, RawSample};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{create_pool, CmlStore, DbResult, RetryPolicy};
use crate::config::DatabaseConfig;

/// PostgreSQL caps bind parameters per statement at `u16::MAX`
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

const METADATA_COLUMNS: usize = 9;
const DATA_COLUMNS: usize = 5;

/// Writer over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct DbWriter {
    pool: PgPool,
    batch_size: usize,
}

impl DbWriter {
    /// Connect with bounded retries; the last error is returned once the
    /// attempts are exhausted
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let policy = RetryPolicy::from_config(config);
        let pool = policy
            .retry("Database connection", || create_pool(config))
            .await?;

        Ok(Self::from_pool(pool, config.batch_size))
    }

    pub fn from_pool(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> DbResult<()> {
        super::health_check(&self.pool).await
    }

    /// Apply the bundled schema migrations
    pub async fn run_migrations(&self) -> DbResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }

    fn rows_per_statement(&self, columns: usize) -> usize {
        self.batch_size.min(MAX_BIND_PARAMS / columns)
    }
}

#[async_trait]
impl CmlStore for DbWriter {
    async fn write_metadata(&self, records: &[LinkMetadata]) -> DbResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let unique = dedupe_last_wins(records);
        if unique.len() < records.len() {
            debug!(
                rows = records.len(),
                unique = unique.len(),
                "Collapsed repeated metadata keys"
            );
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in unique.chunks(self.rows_per_statement(METADATA_COLUMNS)) {
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO cml_metadata (link_id, sublink_id, site_0_longitude, \
                 site_0_latitude, site_1_longitude, site_1_latitude, frequency, \
                 polarization, length) ",
            );
            query.push_values(chunk, |mut row, link| {
                row.push_bind(link.link_id.as_str())
                    .push_bind(link.sublink_id.as_str())
                    .push_bind(link.site_0.longitude)
                    .push_bind(link.site_0.latitude)
                    .push_bind(link.site_1.longitude)
                    .push_bind(link.site_1.latitude)
                    .push_bind(link.frequency)
                    .push_bind(link.polarization.as_deref())
                    .push_bind(link.length);
            });
            query.push(
                " ON CONFLICT (link_id, sublink_id) DO UPDATE SET \
                 site_0_longitude = EXCLUDED.site_0_longitude, \
                 site_0_latitude = EXCLUDED.site_0_latitude, \
                 site_1_longitude = EXCLUDED.site_1_longitude, \
                 site_1_latitude = EXCLUDED.site_1_latitude, \
                 frequency = EXCLUDED.frequency, \
                 polarization = EXCLUDED.polarization, \
                 length = EXCLUDED.length, \
                 updated_at = NOW()",
            );

            affected += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(rows = affected, "Upserted link metadata");
        Ok(affected)
    }

    async fn write_timeseries(&self, records: &[RawSample]) -> DbResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in records.chunks(self.rows_per_statement(DATA_COLUMNS)) {
            let mut query: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO cml_data (time, link_id, sublink_id, tsl, rsl) ");
            query.push_values(chunk, |mut row, sample| {
                row.push_bind(sample.time)
                    .push_bind(sample.link_id.as_str())
                    .push_bind(sample.sublink_id.as_str())
                    .push_bind(sample.tsl)
                    .push_bind(sample.rsl);
            });

            inserted += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(rows = inserted, "Inserted raw samples");
        Ok(inserted)
    }

    async fn missing_references(&self, records: &[RawSample]) -> DbResult<BTreeSet<LinkKey>> {
        let keys: BTreeSet<LinkKey> = records.iter().map(RawSample::key).collect();
        if keys.is_empty() {
            return Ok(keys);
        }

        let (link_ids, sublink_ids): (Vec<String>, Vec<String>) = keys
            .into_iter()
            .map(|key| (key.link_id, key.sublink_id))
            .unzip();

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT k.link_id, k.sublink_id \
             FROM UNNEST($1::text[], $2::text[]) AS k(link_id, sublink_id) \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM cml_metadata m \
                 WHERE m.link_id = k.link_id AND m.sublink_id = k.sublink_id \
             )",
        )
        .bind(link_ids)
        .bind(sublink_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(link_id, sublink_id)| LinkKey::new(link_id, sublink_id))
            .collect())
    }
}

/// Collapse repeated keys, keeping the first position and the last values
fn dedupe_last_wins(records: &[LinkMetadata]) -> Vec<&LinkMetadata> {
    let mut position: HashMap<LinkKey, usize> = HashMap::new();
    let mut unique: Vec<&LinkMetadata> = Vec::with_capacity(records.len());

    for record in records {
        match position.entry(record.key()) {
            Entry::Occupied(slot) => unique[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(record);
            }
        }
    }

    unique
}
