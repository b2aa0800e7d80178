use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SnapshotModel {
    pub id: i64,
    pub investor_id: i32,
    pub snapshot_date: NaiveDate,
    pub source: String,
    pub filing_date: Option<NaiveDate>,
    pub period_end_date: Option<NaiveDate>,
    pub total_positions: i32,
    pub total_value: Option<Decimal>,
    pub is_processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewSnapshotModel {
    pub investor_id: i32,
    pub snapshot_date: NaiveDate,
    pub source: String,
    pub filing_date: Option<NaiveDate>,
    pub period_end_date: Option<NaiveDate>,
    pub total_positions: i32,
    pub total_value: Option<Decimal>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HoldingRecordModel {
    pub id: i64,
    pub snapshot_id: i64,
    pub ticker: String,
    pub cusip: Option<String>,
    pub company_name: Option<String>,
    pub shares: Decimal,
    pub market_value: Option<Decimal>,
    pub weight_percent: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewHoldingRecordModel {
    pub ticker: String,
    pub cusip: Option<String>,
    pub company_name: Option<String>,
    pub shares: Decimal,
    pub market_value: Option<Decimal>,
    pub weight_percent: Option<Decimal>,
}
