use sqlx::{PgPool, Postgres, Transaction};

use crate::db::models::snapshots::{
    HoldingRecordModel, NewHoldingRecordModel, NewSnapshotModel, SnapshotModel,
};

/// Insert a snapshot header inside an open transaction, returning its id.
/// A unique violation on (investor_id, snapshot_date) surfaces as
/// `sqlx::Error::Database` and is interpreted by the snapshot store.
pub async fn insert_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &NewSnapshotModel,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO holdings_snapshots
            (investor_id, snapshot_date, source, filing_date, period_end_date,
             total_positions, total_value, is_processed)
        VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
        RETURNING id
        "#,
    )
    .bind(snapshot.investor_id)
    .bind(snapshot.snapshot_date)
    .bind(&snapshot.source)
    .bind(snapshot.filing_date)
    .bind(snapshot.period_end_date)
    .bind(snapshot.total_positions)
    .bind(snapshot.total_value)
    .fetch_one(&mut **tx)
    .await
}

pub async fn insert_holding_record(
    tx: &mut Transaction<'_, Postgres>,
    snapshot_id: i64,
    record: &NewHoldingRecordModel,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO holding_records
            (snapshot_id, ticker, cusip, company_name, shares, market_value, weight_percent)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(snapshot_id)
    .bind(&record.ticker)
    .bind(&record.cusip)
    .bind(&record.company_name)
    .bind(record.shares)
    .bind(record.market_value)
    .bind(record.weight_percent)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn snapshot_exists(
    pool: &PgPool,
    investor_id: i32,
    snapshot_date: chrono::NaiveDate,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM holdings_snapshots
            WHERE investor_id = $1 AND snapshot_date = $2
        )
        "#,
    )
    .bind(investor_id)
    .bind(snapshot_date)
    .fetch_one(pool)
    .await
}

/// The most recent fully committed snapshot for an investor, used as the
/// diff baseline. Unprocessed snapshots are never visible here.
pub async fn latest_processed_snapshot(
    pool: &PgPool,
    investor_id: i32,
) -> Result<Option<SnapshotModel>, sqlx::Error> {
    sqlx::query_as::<_, SnapshotModel>(
        r#"
        SELECT id, investor_id, snapshot_date, source, filing_date, period_end_date,
               total_positions, total_value, is_processed
        FROM holdings_snapshots
        WHERE investor_id = $1 AND is_processed = TRUE
        ORDER BY snapshot_date DESC
        LIMIT 1
        "#,
    )
    .bind(investor_id)
    .fetch_optional(pool)
    .await
}

pub async fn records_for_snapshot(
    pool: &PgPool,
    snapshot_id: i64,
) -> Result<Vec<HoldingRecordModel>, sqlx::Error> {
    sqlx::query_as::<_, HoldingRecordModel>(
        r#"
        SELECT id, snapshot_id, ticker, cusip, company_name, shares, market_value, weight_percent
        FROM holding_records
        WHERE snapshot_id = $1
        ORDER BY id
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(pool)
    .await
}
