use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use super::models::snapshots::{HoldingRecordModel, NewHoldingRecordModel, NewSnapshotModel, SnapshotModel};
use super::queries::snapshots as snapshot_queries;

#[derive(Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Stored(i64),
    /// A snapshot for this (investor_id, snapshot_date) already exists.
    /// Idempotent no-op: duplicate scheduler triggers land here.
    SkippedDuplicate,
}

#[derive(Clone)]
pub struct SnapshotStore {
    pool: PgPool,
}

impl SnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a snapshot header and all of its records in one transaction,
    /// with `is_processed` set as part of the same commit so a crash mid-write
    /// leaves nothing visible to diff readers.
    ///
    /// The unique constraint on (investor_id, snapshot_date) is the race
    /// safety net: a concurrent writer that loses the insert race detects the
    /// conflict and returns `SkippedDuplicate` instead of erroring.
    #[instrument(skip(self, records), fields(record_count = records.len()))]
    pub async fn create_snapshot(
        &self,
        investor_id: i32,
        snapshot_date: NaiveDate,
        source: &str,
        filing_date: Option<NaiveDate>,
        period_end_date: Option<NaiveDate>,
        records: &[NewHoldingRecordModel],
    ) -> Result<SnapshotOutcome, sqlx::Error> {
        // Fast path: skip the write entirely when the snapshot is already there.
        if snapshot_queries::snapshot_exists(&self.pool, investor_id, snapshot_date).await? {
            debug!(investor_id, %snapshot_date, "Snapshot already exists, skipping");
            return Ok(SnapshotOutcome::SkippedDuplicate);
        }

        let total_value: Decimal = records.iter().filter_map(|r| r.market_value).sum();
        let snapshot = NewSnapshotModel {
            investor_id,
            snapshot_date,
            source: source.to_string(),
            filing_date,
            period_end_date,
            total_positions: records.len() as i32,
            total_value: if records.iter().any(|r| r.market_value.is_some()) {
                Some(total_value)
            } else {
                None
            },
        };

        let mut tx = self.pool.begin().await?;
        let snapshot_id = match snapshot_queries::insert_snapshot(&mut tx, &snapshot).await {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                // Lost the race against a concurrent writer for the same date.
                tx.rollback().await?;
                debug!(investor_id, %snapshot_date, "Lost snapshot insert race, skipping");
                return Ok(SnapshotOutcome::SkippedDuplicate);
            }
            Err(e) => return Err(e),
        };
        for record in records {
            snapshot_queries::insert_holding_record(&mut tx, snapshot_id, record).await?;
        }
        tx.commit().await?;

        info!(
            investor_id,
            %snapshot_date,
            snapshot_id,
            positions = records.len(),
            "Snapshot stored"
        );
        Ok(SnapshotOutcome::Stored(snapshot_id))
    }

    /// The diff baseline: most recent processed snapshot with its records.
    /// `None` means first-ever ingestion and no diff is computed this run.
    pub async fn latest_snapshot(
        &self,
        investor_id: i32,
    ) -> Result<Option<(SnapshotModel, Vec<HoldingRecordModel>)>, sqlx::Error> {
        let Some(snapshot) = snapshot_queries::latest_processed_snapshot(&self.pool, investor_id).await?
        else {
            return Ok(None);
        };
        let records = snapshot_queries::records_for_snapshot(&self.pool, snapshot.id).await?;
        Ok(Some((snapshot, records)))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
