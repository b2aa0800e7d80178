use sqlx::PgPool;

use crate::db::models::identifier_mappings::IdentifierMappingModel;

pub async fn get_mapping(
    pool: &PgPool,
    cusip: &str,
) -> Result<Option<IdentifierMappingModel>, sqlx::Error> {
    sqlx::query_as::<_, IdentifierMappingModel>(
        r#"
        SELECT cusip, ticker, source, confidence, resolved_at
        FROM identifier_mappings
        WHERE cusip = $1
        "#,
    )
    .bind(cusip)
    .fetch_optional(pool)
    .await
}

/// Upsert a resolved mapping. A later resolution for the same cusip replaces
/// the earlier one; placeholder outcomes must never reach this function.
pub async fn upsert_mapping(
    pool: &PgPool,
    cusip: &str,
    ticker: &str,
    source: &str,
    confidence: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO identifier_mappings (cusip, ticker, source, confidence, resolved_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (cusip) DO UPDATE
        SET ticker = EXCLUDED.ticker,
            source = EXCLUDED.source,
            confidence = EXCLUDED.confidence,
            resolved_at = EXCLUDED.resolved_at
        "#,
    )
    .bind(cusip)
    .bind(ticker)
    .bind(source)
    .bind(confidence)
    .execute(pool)
    .await?;
    Ok(())
}
