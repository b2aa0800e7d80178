use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvestorModel {
    pub id: i32,
    pub name: String,
    pub last_data_fetch: Option<DateTime<Utc>>,
    pub last_change_detected: Option<DateTime<Utc>>,
}

/// One configured disclosure feed for an investor. `source_config` holds the
/// feed URL for ETF_HOLDINGS sources and the SEC CIK for SEC_13F sources.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DisclosureSourceModel {
    pub id: i32,
    pub investor_id: i32,
    pub source_type: String,
    pub source_config: Option<String>,
    pub reporting_delay_days: i32,
}
