use governor::{DefaultDirectRateLimiter, Quota};
use nonzero_ext::*;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::IngestError;

struct SharedRateLimiter {
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl reqwest_ratelimit::RateLimiter for SharedRateLimiter {
    async fn acquire_permit(&self) {
        self.rate_limiter.until_ready().await;
    }
}

/// One HTTP client per external dependency. Each carries its own governor
/// quota so a provider's global rate limit is honored across all concurrent
/// ingestion runs sharing the client.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: ClientWithMiddleware,
    label: &'static str,
}

impl FeedClient {
    fn build(
        label: &'static str,
        per_second: NonZeroU32,
        timeout: Duration,
        max_retries: u32,
        default_headers: HeaderMap,
    ) -> Self {
        let reqwest_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .expect("Failed to create HTTP client");

        let rate_limiter = SharedRateLimiter {
            rate_limiter: Arc::new(DefaultDirectRateLimiter::direct(Quota::per_second(per_second))),
        };

        let mut builder = ClientBuilder::new(reqwest_client);
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder()
                .retry_bounds(Duration::from_millis(500), Duration::from_secs(4))
                .build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }
        let http = builder.with(reqwest_ratelimit::all(rate_limiter)).build();

        Self { http, label }
    }

    pub async fn get_text(&self, url: &str) -> Result<String, IngestError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::from_http(self.label, e))?;
        let resp = self.check_status(resp)?;
        resp.text()
            .await
            .map_err(|e| IngestError::TransientFetch(format!("{}: body read: {e}", self.label)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, IngestError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::from_http(self.label, e))?;
        let resp = self.check_status(resp)?;
        resp.json()
            .await
            .map_err(|e| IngestError::PermanentFetch(format!("{}: malformed JSON: {e}", self.label)))
    }

    pub async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, IngestError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| IngestError::from_http(self.label, e))?;
        let resp = self.check_status(resp)?;
        resp.json()
            .await
            .map_err(|e| IngestError::PermanentFetch(format!("{}: malformed JSON: {e}", self.label)))
    }

    fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response, IngestError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else if status.is_server_error() {
            Err(IngestError::TransientFetch(format!("{}: {status}", self.label)))
        } else {
            Err(IngestError::PermanentFetch(format!("{}: {status}", self.label)))
        }
    }
}

pub struct HttpClients {
    /// Per-fund ETF holdings feeds (arbitrary issuer hosts).
    pub etf: FeedClient,
    /// SEC EDGAR: submissions index, filing file indexes and info tables.
    pub edgar: FeedClient,
    /// OpenFIGI identifier mapping. No retry middleware: the resolver is
    /// specified as a single bounded-timeout attempt per cusip per run.
    pub openfigi: FeedClient,
    pub polygon: FeedClient,
    pub stooq: FeedClient,
}

impl HttpClients {
    pub fn new(config: &Config) -> Self {
        let mut edgar_headers = HeaderMap::new();
        // EDGAR requires an identifying User-Agent and rejects anonymous clients.
        if let Ok(ua) = HeaderValue::from_str(&config.sec_user_agent) {
            edgar_headers.insert(reqwest::header::USER_AGENT, ua);
        }

        let mut figi_headers = HeaderMap::new();
        if let Some(key) = &config.openfigi_api_key {
            if let Ok(v) = HeaderValue::from_str(key) {
                figi_headers.insert(HeaderName::from_static("x-openfigi-apikey"), v);
            }
        }

        Self {
            etf: FeedClient::build(
                "etf_feed",
                nonzero!(5u32),
                Duration::from_secs(30),
                config.max_fetch_retries,
                HeaderMap::new(),
            ),
            edgar: FeedClient::build(
                "sec_edgar",
                nonzero!(5u32),
                Duration::from_secs(30),
                config.max_fetch_retries,
                edgar_headers,
            ),
            openfigi: FeedClient::build(
                "openfigi",
                nonzero!(2u32),
                Duration::from_secs(5),
                0,
                figi_headers,
            ),
            polygon: FeedClient::build(
                "polygon",
                nonzero!(5u32),
                Duration::from_secs(10),
                config.max_fetch_retries,
                HeaderMap::new(),
            ),
            stooq: FeedClient::build(
                "stooq",
                nonzero!(2u32),
                Duration::from_secs(10),
                config.max_fetch_retries,
                HeaderMap::new(),
            ),
        }
    }
}
