//! DataSource port: the fetch capability task handlers use.
//!
//! Implementations must be safe to call again after a failure; the retry
//! policy re-runs whole attempts.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("source '{0}' not found")]
    UnknownSource(String),

    #[error("source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("invalid params for '{source_name}': {reason}")]
    InvalidParams { source_name: String, reason: String },

    /// No data source was configured on the orchestrator.
    #[error("no data source configured")]
    NotConfigured,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(
        &self,
        source: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError>;
}
