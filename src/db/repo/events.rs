//! Raw event log, cursor checkpoint, and cached price operations.

use crate::domain::{Address, Decimal, TxHash};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;

use super::{parse_decimal, CachedPrice, RawEventRecord, Repository, StoreError};

impl Repository {
    /// Append a decoded event to the audit log idempotently.
    ///
    /// Returns `false` if the event was already recorded.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn record_raw_event(&self, record: &RawEventRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_events
                (event, contract, tx_hash, log_index, block_number, decoded_data, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(&record.event)
        .bind(record.contract.as_str())
        .bind(record.tx_hash.as_str())
        .bind(record.log_index as i64)
        .bind(record.block_number as i64)
        .bind(record.decoded_data.to_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recorded events with `from <= block_number <= to`, in chain order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn raw_events_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawEventRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event, contract, tx_hash, log_index, block_number, decoded_data
            FROM raw_events
            WHERE block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC, log_index ASC
            "#,
        )
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let data: String = row.get("decoded_data");
                Ok(RawEventRecord {
                    event: row.get("event"),
                    contract: Address::new(row.get::<String, _>("contract")),
                    tx_hash: TxHash::new(row.get::<String, _>("tx_hash")),
                    log_index: row.get::<i64, _>("log_index") as u64,
                    block_number: row.get::<i64, _>("block_number") as u64,
                    decoded_data: serde_json::from_str(&data)
                        .map_err(|e| StoreError::Corrupt(format!("decoded_data: {}", e)))?,
                })
            })
            .collect()
    }

    /// Last fully processed block for an indexer, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_cursor(&self, indexer_id: &str) -> Result<Option<u64>, StoreError> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT block_number FROM indexer_cursor WHERE indexer_id = ?")
                .bind(indexer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(block.map(|b| b as u64))
    }

    /// Store the last fully processed block for an indexer.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn save_cursor(&self, indexer_id: &str, block_number: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (indexer_id, block_number, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(indexer_id) DO UPDATE SET
                block_number = excluded.block_number,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(indexer_id)
        .bind(block_number as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remember a successfully read oracle price.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn cache_price(
        &self,
        price: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO price_records (price, observed_at) VALUES (?, ?)")
            .bind(price.to_canonical_string())
            .bind(observed_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recently cached oracle price.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn latest_cached_price(&self) -> Result<Option<CachedPrice>, StoreError> {
        let row = sqlx::query(
            "SELECT price, observed_at FROM price_records ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let millis: i64 = row.get("observed_at");
        let observed_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| StoreError::Corrupt(format!("observed_at={}", millis)))?;

        Ok(Some(CachedPrice {
            price: parse_decimal("price", &row.get::<String, _>("price"))?,
            observed_at,
        }))
    }
}
