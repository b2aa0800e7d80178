use sqlx::{Executor, postgres::PgPool};

pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(include_str!("investors.sql")).await?;
    pool.execute(include_str!("disclosure_sources.sql")).await?;
    pool.execute(include_str!("holdings_snapshots.sql")).await?;
    pool.execute(include_str!("holding_records.sql")).await?;
    pool.execute(include_str!("holdings_changes.sql")).await?;
    pool.execute(include_str!("identifier_mappings.sql")).await?;

    // Create indices for the hot read paths
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_holding_records_snapshot
        ON holding_records(snapshot_id);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_holdings_changes_investor_date
        ON holdings_changes(investor_id, to_date);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
