//! Seams to the remote conversation service.
//!
//! The sync core only talks to [`DirectoryService`] and [`HistoryService`];
//! [`SlackClient`] implements both over the Slack Web API and tests plug in
//! in-process stubs.

pub mod slack;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use slack::SlackClient;
pub use types::{MessageRecord, Page, SourceInfo};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned error status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Lists the conversations the credential can read.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn list_accessible_sources(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<SourceInfo>>;
}

/// Returns messages for one conversation, optionally bounded below by `oldest`.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn list_messages(
        &self,
        source_id: &str,
        oldest: Option<f64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<MessageRecord>>;
}
