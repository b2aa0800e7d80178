use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::models::changes::{ChangeModel, NewChangeModel};

/// Insert one change row inside the run's transaction. Conflicts on
/// (investor_id, ticker, to_date) are ignored so a redelivered run never
/// duplicates or mutates an existing change.
pub async fn insert_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &NewChangeModel,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO holdings_changes
            (investor_id, ticker, change_type, from_date, to_date,
             shares_before, shares_after, shares_delta, shares_delta_percent,
             weight_before, weight_after, weight_delta,
             value_before, value_after, value_delta,
             price_range_low, price_range_high)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (investor_id, ticker, to_date) DO NOTHING
        "#,
    )
    .bind(change.investor_id)
    .bind(&change.ticker)
    .bind(&change.change_type)
    .bind(change.from_date)
    .bind(change.to_date)
    .bind(change.shares_before)
    .bind(change.shares_after)
    .bind(change.shares_delta)
    .bind(change.shares_delta_percent)
    .bind(change.weight_before)
    .bind(change.weight_after)
    .bind(change.weight_delta)
    .bind(change.value_before)
    .bind(change.value_after)
    .bind(change.value_delta)
    .bind(change.price_range_low)
    .bind(change.price_range_high)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Changes whose enrichment failed at ingestion time, oldest first.
pub async fn changes_missing_price_range(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<ChangeModel>, sqlx::Error> {
    sqlx::query_as::<_, ChangeModel>(
        r#"
        SELECT id, investor_id, ticker, change_type, from_date, to_date,
               shares_before, shares_after, shares_delta, shares_delta_percent,
               weight_before, weight_after, weight_delta,
               value_before, value_after, value_delta,
               price_range_low, price_range_high, created_at
        FROM holdings_changes
        WHERE price_range_low IS NULL
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Backfill is the only permitted mutation of a persisted change.
pub async fn update_price_range(
    pool: &PgPool,
    change_id: i64,
    low: Decimal,
    high: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE holdings_changes
        SET price_range_low = $2, price_range_high = $3
        WHERE id = $1
        "#,
    )
    .bind(change_id)
    .bind(low)
    .bind(high)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn changes_for_investor_on(
    pool: &PgPool,
    investor_id: i32,
    to_date: NaiveDate,
) -> Result<Vec<ChangeModel>, sqlx::Error> {
    sqlx::query_as::<_, ChangeModel>(
        r#"
        SELECT id, investor_id, ticker, change_type, from_date, to_date,
               shares_before, shares_after, shares_delta, shares_delta_percent,
               weight_before, weight_after, weight_delta,
               value_before, value_after, value_delta,
               price_range_low, price_range_high, created_at
        FROM holdings_changes
        WHERE investor_id = $1 AND to_date = $2
        ORDER BY id
        "#,
    )
    .bind(investor_id)
    .bind(to_date)
    .fetch_all(pool)
    .await
}
