//! Position record and history operations for the repository.

use crate::domain::{
    Address, Decimal, HistoryEntry, LifecycleOperation, Position, PositionState, PositionStatus,
    TxHash,
};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use super::{
    is_unique_violation, parse_decimal, parse_status, parse_timestamp, ActiveTotals,
    EventOutcome, PositionFilter, Repository, StatusFilter, StoreError,
};

const POSITION_COLUMNS: &str =
    "position_id, wallet, asset, coll, debt, health_ratio, status, block_number";

impl Repository {
    /// Next unused position identity: one past the highest assigned, or 1.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn next_identity(&self) -> Result<i64, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(position_id) FROM positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|id| id + 1).unwrap_or(1))
    }

    /// Insert a new position together with its initial history.
    ///
    /// # Errors
    /// Returns `DuplicateIdentity` if the identity is already taken, or a
    /// database error.
    pub async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO positions
                (position_id, wallet, asset, coll, debt, health_ratio, status, block_number, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.position_id)
        .bind(position.wallet.as_str())
        .bind(position.asset.as_str())
        .bind(position.coll.to_canonical_string())
        .bind(position.debt.to_canonical_string())
        .bind(position.health_ratio.to_canonical_string())
        .bind(position.status.as_str())
        .bind(position.block_number as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StoreError::DuplicateIdentity(position.position_id));
            }
            return Err(e.into());
        }

        for entry in &position.history {
            insert_history(&mut tx, position.position_id, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Replace the mutable fields of the most recent record of the pair that
    /// passes `filter`, and append `entry` to its history.
    ///
    /// Returns the identity of the updated record.
    ///
    /// # Errors
    /// Returns `NotFound` if no record matches, or a database error.
    pub async fn update_latest(
        &self,
        wallet: &Address,
        asset: &Address,
        filter: StatusFilter,
        state: &PositionState,
        entry: &HistoryEntry,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let position_id: Option<i64> = match filter {
            StatusFilter::Any => {
                sqlx::query_scalar(
                    r#"
                    SELECT position_id FROM positions
                    WHERE wallet = ? AND asset = ?
                    ORDER BY position_id DESC LIMIT 1
                    "#,
                )
                .bind(wallet.as_str())
                .bind(asset.as_str())
                .fetch_optional(&mut *tx)
                .await?
            }
            StatusFilter::Only(status) => {
                sqlx::query_scalar(
                    r#"
                    SELECT position_id FROM positions
                    WHERE wallet = ? AND asset = ? AND status = ?
                    ORDER BY position_id DESC LIMIT 1
                    "#,
                )
                .bind(wallet.as_str())
                .bind(asset.as_str())
                .bind(status.as_str())
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        let Some(position_id) = position_id else {
            return Err(StoreError::NotFound {
                wallet: wallet.clone(),
                asset: asset.clone(),
            });
        };

        sqlx::query(
            r#"
            UPDATE positions
            SET coll = ?, debt = ?, health_ratio = ?, status = ?, block_number = ?, updated_at = ?
            WHERE position_id = ?
            "#,
        )
        .bind(state.coll.to_canonical_string())
        .bind(state.debt.to_canonical_string())
        .bind(state.health_ratio.to_canonical_string())
        .bind(state.status.as_str())
        .bind(state.block_number as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(position_id)
        .execute(&mut *tx)
        .await?;

        insert_history(&mut tx, position_id, entry).await?;

        tx.commit().await?;
        Ok(position_id)
    }

    /// Most recently created record for the pair, regardless of status,
    /// with its full history.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn latest_position(
        &self,
        wallet: &Address,
        asset: &Address,
    ) -> Result<Option<Position>, StoreError> {
        let sql = format!(
            "SELECT {} FROM positions WHERE wallet = ? AND asset = ? ORDER BY position_id DESC LIMIT 1",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet.as_str())
            .bind(asset.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut position = position_from_row(&row)?;
                position.history = self.position_history(position.position_id).await?;
                Ok(Some(position))
            }
            None => Ok(None),
        }
    }

    /// Most recently created record for the pair without its history.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn latest_position_state(
        &self,
        wallet: &Address,
        asset: &Address,
    ) -> Result<Option<Position>, StoreError> {
        let sql = format!(
            "SELECT {} FROM positions WHERE wallet = ? AND asset = ? ORDER BY position_id DESC LIMIT 1",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet.as_str())
            .bind(asset.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    /// One record by identity, with its full history.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn position(&self, position_id: i64) -> Result<Option<Position>, StoreError> {
        let sql = format!(
            "SELECT {} FROM positions WHERE position_id = ?",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut position = position_from_row(&row)?;
                position.history = self.position_history(position_id).await?;
                Ok(Some(position))
            }
            None => Ok(None),
        }
    }

    /// Current state of every record passing the filter, ordered by
    /// identity. History is not loaded.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn list_positions(&self, filter: &PositionFilter) -> Result<Vec<Position>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM positions
            WHERE (?1 IS NULL OR wallet = ?1)
              AND (?2 IS NULL OR asset = ?2)
              AND (?3 IS NULL OR status = ?3)
            ORDER BY position_id ASC
            "#,
            POSITION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.wallet.as_ref().map(|a| a.as_str()))
            .bind(filter.asset.as_ref().map(|a| a.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(position_from_row).collect()
    }

    /// History of one record in the order it was appended.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn position_history(&self, position_id: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, coll, debt, operation, timestamp, block_number
            FROM position_history
            WHERE position_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    tx_hash: TxHash::new(row.get::<String, _>("tx_hash")),
                    log_index: row.get::<i64, _>("log_index") as u64,
                    coll: parse_decimal("coll", &row.get::<String, _>("coll"))?,
                    debt: parse_decimal("debt", &row.get::<String, _>("debt"))?,
                    operation: LifecycleOperation::from_label(&row.get::<String, _>("operation")),
                    timestamp: parse_timestamp("timestamp", &row.get::<String, _>("timestamp"))?,
                    block_number: row.get::<i64, _>("block_number") as u64,
                })
            })
            .collect()
    }

    /// Whether a lifecycle event was already settled, applied or dropped.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_event_processed(&self, tx_hash: &TxHash, log_index: u64) -> Result<bool, StoreError> {
        Ok(self.event_outcome(tx_hash, log_index).await?.is_some())
    }

    /// Outcome recorded for a lifecycle event, if it was processed.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn event_outcome(
        &self,
        tx_hash: &TxHash,
        log_index: u64,
    ) -> Result<Option<EventOutcome>, StoreError> {
        let outcome: Option<String> = sqlx::query_scalar(
            "SELECT outcome FROM processed_events WHERE tx_hash = ? AND log_index = ?",
        )
        .bind(tx_hash.as_str())
        .bind(log_index as i64)
        .fetch_optional(&self.pool)
        .await?;
        outcome.as_deref().map(EventOutcome::parse).transpose()
    }

    /// Mark a lifecycle event as dropped so a replay does not judge it
    /// again. Returns `false` if the event was already processed.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn record_dropped_event(
        &self,
        tx_hash: &TxHash,
        log_index: u64,
        block_number: u64,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events
                (tx_hash, log_index, block_number, outcome, reason, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(tx_hash.as_str())
        .bind(log_index as i64)
        .bind(block_number as i64)
        .bind(EventOutcome::Dropped.as_str())
        .bind(reason)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count and amount sums over active records.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is corrupt.
    pub async fn active_totals(&self) -> Result<ActiveTotals, StoreError> {
        let rows = sqlx::query("SELECT coll, debt FROM positions WHERE status = ?")
            .bind(PositionStatus::Active.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut totals = ActiveTotals {
            count: 0,
            coll: Decimal::zero(),
            debt: Decimal::zero(),
        };
        for row in &rows {
            let coll = parse_decimal("coll", &row.get::<String, _>("coll"))?;
            let debt = parse_decimal("debt", &row.get::<String, _>("debt"))?;
            totals.count += 1;
            totals.coll = totals
                .coll
                .checked_add(coll)
                .ok_or_else(|| StoreError::Corrupt("active collateral total overflows".into()))?;
            totals.debt = totals
                .debt
                .checked_add(debt)
                .ok_or_else(|| StoreError::Corrupt("active debt total overflows".into()))?;
        }
        Ok(totals)
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    position_id: i64,
    entry: &HistoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO position_history
            (position_id, tx_hash, log_index, coll, debt, operation, timestamp, block_number)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position_id)
    .bind(entry.tx_hash.as_str())
    .bind(entry.log_index as i64)
    .bind(entry.coll.to_canonical_string())
    .bind(entry.debt.to_canonical_string())
    .bind(entry.operation.label())
    .bind(entry.timestamp.to_rfc3339())
    .bind(entry.block_number as i64)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO processed_events
            (tx_hash, log_index, block_number, outcome, reason, processed_at)
        VALUES (?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(entry.tx_hash.as_str())
    .bind(entry.log_index as i64)
    .bind(entry.block_number as i64)
    .bind(EventOutcome::Applied.as_str())
    .bind(Utc::now().timestamp_millis())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn position_from_row(row: &SqliteRow) -> Result<Position, StoreError> {
    Ok(Position {
        position_id: row.get::<i64, _>("position_id"),
        wallet: Address::new(row.get::<String, _>("wallet")),
        asset: Address::new(row.get::<String, _>("asset")),
        coll: parse_decimal("coll", &row.get::<String, _>("coll"))?,
        debt: parse_decimal("debt", &row.get::<String, _>("debt"))?,
        health_ratio: parse_decimal("health_ratio", &row.get::<String, _>("health_ratio"))?,
        status: parse_status(&row.get::<String, _>("status"))?,
        block_number: row.get::<i64, _>("block_number") as u64,
        history: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_repo;
    use super::*;
    use chrono::{DateTime, Utc};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn wallet() -> Address {
        Address::new("0x000000000000000000000000000000000000000a")
    }

    fn asset() -> Address {
        Address::new("0x000000000000000000000000000000000000000b")
    }

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entry(tx: &str, log_index: u64, coll: &str, debt: &str, op: LifecycleOperation) -> HistoryEntry {
        HistoryEntry {
            tx_hash: TxHash::new(tx),
            log_index,
            coll: d(coll),
            debt: d(debt),
            operation: op,
            timestamp: ts(),
            block_number: 100,
        }
    }

    fn opened(id: i64, tx: &str) -> Position {
        Position {
            position_id: id,
            wallet: wallet(),
            asset: asset(),
            coll: d("10"),
            debt: d("5"),
            health_ratio: d("50"),
            status: PositionStatus::Active,
            block_number: 100,
            history: vec![entry(tx, 0, "10", "5", LifecycleOperation::Opened)],
        }
    }

    fn state(coll: &str, debt: &str, ratio: &str, status: PositionStatus) -> PositionState {
        PositionState {
            coll: d(coll),
            debt: d(debt),
            health_ratio: d(ratio),
            status,
            block_number: 101,
        }
    }

    #[tokio::test]
    async fn test_next_identity_starts_at_one() {
        let (repo, _temp) = temp_repo().await;
        assert_eq!(repo.next_identity().await.unwrap(), 1);

        repo.insert_position(&opened(4, "0x01")).await.unwrap();
        assert_eq!(repo.next_identity().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let (repo, _temp) = temp_repo().await;
        let position = opened(1, "0x01");
        repo.insert_position(&position).await.unwrap();

        let stored = repo.position(1).await.unwrap().expect("stored");
        assert_eq!(stored, position);

        let latest = repo.latest_position(&wallet(), &asset()).await.unwrap();
        assert_eq!(latest, Some(position));
    }

    #[tokio::test]
    async fn test_insert_duplicate_identity() {
        let (repo, _temp) = temp_repo().await;
        repo.insert_position(&opened(1, "0x01")).await.unwrap();

        let err = repo.insert_position(&opened(1, "0x02")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(1)));
        // The failed insert must not leave a history row behind.
        assert!(!repo.is_event_processed(&TxHash::new("0x02"), 0).await.unwrap());
        assert_eq!(repo.position(1).await.unwrap().unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_update_latest_appends_history() {
        let (repo, _temp) = temp_repo().await;
        repo.insert_position(&opened(1, "0x01")).await.unwrap();

        let id = repo
            .update_latest(
                &wallet(),
                &asset(),
                StatusFilter::Only(PositionStatus::Active),
                &state("12", "6", "50", PositionStatus::Active),
                &entry("0x02", 1, "12", "6", LifecycleOperation::Adjusted),
            )
            .await
            .unwrap();
        assert_eq!(id, 1);

        let stored = repo.position(1).await.unwrap().unwrap();
        assert_eq!(stored.coll, d("12"));
        assert_eq!(stored.block_number, 101);
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.history[1].operation, LifecycleOperation::Adjusted);
        assert_eq!(stored.history[1].timestamp, ts());
    }

    #[tokio::test]
    async fn test_update_latest_respects_status_filter() {
        let (repo, _temp) = temp_repo().await;
        let mut closed = opened(1, "0x01");
        closed.status = PositionStatus::Closed;
        repo.insert_position(&closed).await.unwrap();

        let err = repo
            .update_latest(
                &wallet(),
                &asset(),
                StatusFilter::Only(PositionStatus::Active),
                &state("1", "1", "100", PositionStatus::Active),
                &entry("0x02", 0, "1", "1", LifecycleOperation::Adjusted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        repo.update_latest(
            &wallet(),
            &asset(),
            StatusFilter::Any,
            &state("1", "1", "100", PositionStatus::Closed),
            &entry("0x02", 0, "1", "1", LifecycleOperation::Adjusted),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_update_latest_targets_most_recent_record() {
        let (repo, _temp) = temp_repo().await;
        let mut first = opened(1, "0x01");
        first.status = PositionStatus::Closed;
        repo.insert_position(&first).await.unwrap();
        repo.insert_position(&opened(2, "0x02")).await.unwrap();

        let id = repo
            .update_latest(
                &wallet(),
                &asset(),
                StatusFilter::Any,
                &state("20", "5", "25", PositionStatus::Active),
                &entry("0x03", 0, "20", "5", LifecycleOperation::Adjusted),
            )
            .await
            .unwrap();
        assert_eq!(id, 2);
        assert_eq!(repo.position(1).await.unwrap().unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_list_positions_filters() {
        let (repo, _temp) = temp_repo().await;
        let mut other = opened(2, "0x02");
        other.wallet = Address::new("0x000000000000000000000000000000000000000c");
        other.status = PositionStatus::Liquidated;
        repo.insert_position(&opened(1, "0x01")).await.unwrap();
        repo.insert_position(&other).await.unwrap();

        let all = repo.list_positions(&PositionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|p| p.history.is_empty()));

        let by_wallet = repo
            .list_positions(&PositionFilter {
                wallet: Some(wallet()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_wallet.len(), 1);
        assert_eq!(by_wallet[0].position_id, 1);

        let liquidated = repo
            .list_positions(&PositionFilter {
                status: Some(PositionStatus::Liquidated),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(liquidated.len(), 1);
        assert_eq!(liquidated[0].position_id, 2);
    }

    #[tokio::test]
    async fn test_applied_events_are_processed() {
        let (repo, _temp) = temp_repo().await;
        assert!(!repo.is_event_processed(&TxHash::new("0x01"), 0).await.unwrap());

        repo.insert_position(&opened(1, "0x01")).await.unwrap();
        assert_eq!(
            repo.event_outcome(&TxHash::new("0x01"), 0).await.unwrap(),
            Some(EventOutcome::Applied)
        );
        assert!(!repo.is_event_processed(&TxHash::new("0x01"), 1).await.unwrap());

        repo.update_latest(
            &wallet(),
            &asset(),
            StatusFilter::Any,
            &state("12", "6", "50", PositionStatus::Active),
            &entry("0x02", 3, "12", "6", LifecycleOperation::Adjusted),
        )
        .await
        .unwrap();
        assert!(repo.is_event_processed(&TxHash::new("0x02"), 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_dropped_event_once() {
        let (repo, _temp) = temp_repo().await;
        let tx = TxHash::new("0x09");

        assert!(repo
            .record_dropped_event(&tx, 2, 100, "no position")
            .await
            .unwrap());
        assert!(!repo
            .record_dropped_event(&tx, 2, 100, "no position")
            .await
            .unwrap());
        assert_eq!(
            repo.event_outcome(&tx, 2).await.unwrap(),
            Some(EventOutcome::Dropped)
        );
        // Dropping never touches positions.
        assert_eq!(repo.next_identity().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_latest_position_state_skips_history() {
        let (repo, _temp) = temp_repo().await;
        assert_eq!(repo.latest_position_state(&wallet(), &asset()).await.unwrap(), None);

        let mut first = opened(1, "0x01");
        first.status = PositionStatus::Closed;
        repo.insert_position(&first).await.unwrap();
        repo.insert_position(&opened(2, "0x02")).await.unwrap();

        let latest = repo
            .latest_position_state(&wallet(), &asset())
            .await
            .unwrap()
            .expect("latest");
        assert_eq!(latest.position_id, 2);
        assert_eq!(latest.status, PositionStatus::Active);
        assert!(latest.history.is_empty());
    }

    #[tokio::test]
    async fn test_active_totals() {
        let (repo, _temp) = temp_repo().await;
        let mut closed = opened(2, "0x02");
        closed.status = PositionStatus::Closed;
        let mut second = opened(3, "0x03");
        second.coll = d("2.5");
        second.debt = d("1.25");

        repo.insert_position(&opened(1, "0x01")).await.unwrap();
        repo.insert_position(&closed).await.unwrap();
        repo.insert_position(&second).await.unwrap();

        let totals = repo.active_totals().await.unwrap();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.coll, d("12.5"));
        assert_eq!(totals.debt, d("6.25"));
    }

    #[tokio::test]
    async fn test_active_totals_overflow_is_an_error() {
        let (repo, _temp) = temp_repo().await;
        let max = "79228162514264337593543950335";
        for id in 1..=2 {
            let mut position = opened(id, &format!("0x0{}", id));
            position.wallet = Address::new(format!("0x00000000000000000000000000000000000000{:02x}", id));
            position.coll = d(max);
            repo.insert_position(&position).await.unwrap();
        }

        let err = repo.active_totals().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
