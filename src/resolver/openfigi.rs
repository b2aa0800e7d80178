use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::IngestError;
use crate::sources::http::FeedClient;

const MAPPING_URL: &str = "https://api.openfigi.com/v3/mapping";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingRequest {
    id_type: &'static str,
    id_value: String,
}

#[derive(Debug, Deserialize)]
struct MappingResult {
    #[serde(default)]
    data: Vec<MappingEntry>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MappingEntry {
    ticker: Option<String>,
}

/// OpenFIGI CUSIP-to-ticker lookups. The shared client carries the global
/// rate limit and a short timeout; there is no retry middleware, so a call
/// here is the resolver's single external attempt for a cusip this run.
pub struct OpenFigiClient {
    client: FeedClient,
}

impl OpenFigiClient {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self))]
    pub async fn lookup_cusip(&self, cusip: &str) -> Result<Option<String>, IngestError> {
        let request = vec![MappingRequest {
            id_type: "ID_CUSIP",
            id_value: cusip.to_string(),
        }];
        let results: Vec<MappingResult> = self.client.post_json(MAPPING_URL, &request).await?;

        let ticker = results
            .into_iter()
            .next()
            .and_then(|r| {
                if let Some(warning) = r.warning {
                    debug!(cusip, warning, "OpenFIGI returned no mapping");
                }
                r.data.into_iter().next()
            })
            .and_then(|e| e.ticker)
            .filter(|t| !t.is_empty());
        Ok(ticker)
    }
}
