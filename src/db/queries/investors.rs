use sqlx::PgPool;

use crate::db::models::investors::{DisclosureSourceModel, InvestorModel};

pub async fn get_investor(pool: &PgPool, investor_id: i32) -> Result<Option<InvestorModel>, sqlx::Error> {
    sqlx::query_as::<_, InvestorModel>(
        r#"
        SELECT id, name, last_data_fetch, last_change_detected
        FROM investors
        WHERE id = $1
        "#,
    )
    .bind(investor_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_investors(pool: &PgPool) -> Result<Vec<InvestorModel>, sqlx::Error> {
    sqlx::query_as::<_, InvestorModel>(
        r#"
        SELECT id, name, last_data_fetch, last_change_detected
        FROM investors
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn list_sources_for_investor(
    pool: &PgPool,
    investor_id: i32,
) -> Result<Vec<DisclosureSourceModel>, sqlx::Error> {
    sqlx::query_as::<_, DisclosureSourceModel>(
        r#"
        SELECT id, investor_id, source_type, source_config, reporting_delay_days
        FROM disclosure_sources
        WHERE investor_id = $1
        ORDER BY id
        "#,
    )
    .bind(investor_id)
    .fetch_all(pool)
    .await
}

/// Record that a fetch completed for an investor, whether or not it produced changes.
pub async fn touch_last_data_fetch(pool: &PgPool, investor_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE investors SET last_data_fetch = NOW() WHERE id = $1")
        .bind(investor_id)
        .execute(pool)
        .await?;
    Ok(())
}
