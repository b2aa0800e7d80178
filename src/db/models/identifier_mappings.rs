use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdentifierMappingModel {
    pub cusip: String,
    pub ticker: String,
    /// Provenance of the mapping: "openfigi" or "heuristic".
    pub source: String,
    pub confidence: f64,
    pub resolved_at: DateTime<Utc>,
}
