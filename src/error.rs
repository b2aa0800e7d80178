use thiserror::Error;

/// Failure taxonomy for a single investor's ingestion run.
///
/// Only `MissingConfig` is fatal for the run up front; `TransientFetch` is
/// retried by the scheduler with backoff, everything else ends the run in a
/// degraded-but-handled way without aborting the batch.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Network-level failure or 5xx from an upstream feed. Retriable.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// 404, empty payload, or a schema the source will never serve correctly.
    /// The investor's run ends with zero holdings; the batch continues.
    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),

    /// No row/entry of the payload could be parsed.
    #[error("parse failure: {0}")]
    Parse(String),

    /// The disclosure source has no usable configuration (e.g. no CIK).
    #[error("missing source configuration: {0}")]
    MissingConfig(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientFetch(_))
    }

    /// Classify an HTTP-layer failure: timeouts, connection errors and 5xx
    /// responses are transient, 4xx responses are permanent.
    pub fn from_http(context: &str, err: reqwest_middleware::Error) -> Self {
        match &err {
            reqwest_middleware::Error::Reqwest(e) => {
                if let Some(status) = e.status() {
                    if status.is_server_error() {
                        IngestError::TransientFetch(format!("{context}: {status}"))
                    } else {
                        IngestError::PermanentFetch(format!("{context}: {status}"))
                    }
                } else if e.is_timeout() || e.is_connect() {
                    IngestError::TransientFetch(format!("{context}: {e}"))
                } else {
                    IngestError::PermanentFetch(format!("{context}: {e}"))
                }
            }
            reqwest_middleware::Error::Middleware(e) => {
                IngestError::TransientFetch(format!("{context}: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IngestError::TransientFetch("timeout".into()).is_transient());
        assert!(!IngestError::PermanentFetch("404".into()).is_transient());
        assert!(!IngestError::MissingConfig("no cik".into()).is_transient());
    }
}
