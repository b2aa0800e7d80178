use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::diff::HoldingsDelta;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChangeModel {
    pub id: i64,
    pub investor_id: i32,
    pub ticker: String,
    pub change_type: String,
    pub from_date: Option<NaiveDate>,
    pub to_date: NaiveDate,
    pub shares_before: Option<Decimal>,
    pub shares_after: Option<Decimal>,
    pub shares_delta: Decimal,
    pub shares_delta_percent: Option<Decimal>,
    pub weight_before: Option<Decimal>,
    pub weight_after: Option<Decimal>,
    pub weight_delta: Option<Decimal>,
    pub value_before: Option<Decimal>,
    pub value_after: Option<Decimal>,
    pub value_delta: Option<Decimal>,
    pub price_range_low: Option<Decimal>,
    pub price_range_high: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewChangeModel {
    pub investor_id: i32,
    pub ticker: String,
    pub change_type: String,
    pub from_date: Option<NaiveDate>,
    pub to_date: NaiveDate,
    pub shares_before: Option<Decimal>,
    pub shares_after: Option<Decimal>,
    pub shares_delta: Decimal,
    pub shares_delta_percent: Option<Decimal>,
    pub weight_before: Option<Decimal>,
    pub weight_after: Option<Decimal>,
    pub weight_delta: Option<Decimal>,
    pub value_before: Option<Decimal>,
    pub value_after: Option<Decimal>,
    pub value_delta: Option<Decimal>,
    pub price_range_low: Option<Decimal>,
    pub price_range_high: Option<Decimal>,
}

impl NewChangeModel {
    pub fn from(
        delta: &HoldingsDelta,
        investor_id: i32,
        from_date: Option<NaiveDate>,
        to_date: NaiveDate,
    ) -> Self {
        Self {
            investor_id,
            ticker: delta.ticker.clone(),
            change_type: delta.change_type.as_str().to_string(),
            from_date,
            to_date,
            shares_before: delta.shares_before,
            shares_after: delta.shares_after,
            shares_delta: delta.shares_delta,
            shares_delta_percent: delta.shares_delta_percent,
            weight_before: delta.weight_before,
            weight_after: delta.weight_after,
            weight_delta: delta.weight_delta,
            value_before: delta.value_before,
            value_after: delta.value_after,
            value_delta: delta.value_delta,
            price_range_low: delta.price_range_low,
            price_range_high: delta.price_range_high,
        }
    }
}
