use chrono::NaiveDate;
use redis::AsyncCommands;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::db::models::changes::NewChangeModel;
use crate::db::queries::changes as change_queries;
use crate::diff::HoldingsDelta;

/// Redis stream consumed by the notification subsystem. Delivery is
/// at-least-once; the consumer dedupes on (investor_id, as_of_date).
pub const NOTIFICATIONS_STREAM: &str = "holdings_change_notifications";

/// Persists a run's diffs and hands downstream notification work to Redis.
///
/// Persistence and bookkeeping commit in one transaction; the stream enqueue
/// happens after the commit and its failure never rolls ingestion back.
#[derive(Clone)]
pub struct ChangeEventEmitter {
    pool: PgPool,
    redis: redis::aio::MultiplexedConnection,
}

impl ChangeEventEmitter {
    pub async fn connect(pool: PgPool, redis_url: &str) -> eyre::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_multiplexed_async_connection().await?;
        Ok(Self { pool, redis })
    }

    /// Persist all changes for a run alongside the investor's freshness
    /// timestamps, then enqueue exactly one notification task for
    /// (investor_id, as_of_date).
    #[instrument(skip(self, changes), fields(change_count = changes.len()))]
    pub async fn emit(
        &self,
        investor_id: i32,
        from_date: Option<NaiveDate>,
        as_of_date: NaiveDate,
        changes: &[HoldingsDelta],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for delta in changes {
            let change = NewChangeModel::from(delta, investor_id, from_date, as_of_date);
            change_queries::insert_change(&mut tx, &change).await?;
        }
        sqlx::query("UPDATE investors SET last_data_fetch = NOW() WHERE id = $1")
            .bind(investor_id)
            .execute(&mut *tx)
            .await?;
        if !changes.is_empty() {
            sqlx::query("UPDATE investors SET last_change_detected = NOW() WHERE id = $1")
                .bind(investor_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(investor_id, %as_of_date, changes = changes.len(), "Changes persisted");

        self.enqueue_notification(investor_id, as_of_date, changes.len())
            .await;
        Ok(())
    }

    /// Fire-and-forget boundary: ingestion data is already committed, so an
    /// enqueue failure is logged and swallowed.
    async fn enqueue_notification(&self, investor_id: i32, as_of_date: NaiveDate, change_count: usize) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<String> = conn
            .xadd(
                NOTIFICATIONS_STREAM,
                "*",
                &[
                    ("investor_id", investor_id.to_string()),
                    ("as_of_date", as_of_date.to_string()),
                    ("change_count", change_count.to_string()),
                ],
            )
            .await;
        match result {
            Ok(id) => info!(investor_id, %as_of_date, stream_id = %id, "Notification task enqueued"),
            Err(e) => warn!(investor_id, %as_of_date, error = %e, "Failed to enqueue notification task"),
        }
    }
}
