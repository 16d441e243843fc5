use super::types::{MessageRecord, Page, SourceInfo};
use super::{BackendError, DirectoryService, HistoryService, Result};
use crate::config::SlackConfig;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim,im";

/// HTTP client for the Slack Web API.
///
/// Owned by whoever builds the sync stack and handed to the resolver and
/// fetcher explicitly.
#[derive(Debug, Clone)]
pub struct SlackClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    ok: bool,
    #[serde(default)]
    channels: Vec<SourceInfo>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited {
                retry_after: parse_retry_after(response.headers().get(RETRY_AFTER)),
            });
        }

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        // Slack reports most failures as 200 with ok=false
        if value.get("error").and_then(|e| e.as_str()) == Some("ratelimited") {
            return Err(BackendError::RateLimited { retry_after });
        }

        Ok(serde_json::from_value(value)?)
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn next_cursor(metadata: Option<ResponseMetadata>) -> Option<String> {
    metadata.and_then(|m| m.next_cursor)
}

/// `oldest` in the fixed microsecond form Slack expects.
pub fn format_oldest(oldest: f64) -> String {
    format!("{:.6}", oldest)
}

#[async_trait]
impl DirectoryService for SlackClient {
    async fn list_accessible_sources(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<SourceInfo>> {
        let mut params = vec![
            ("types", CONVERSATION_TYPES.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let response: ConversationsResponse = self.call("users.conversations", &params).await?;
        if !response.ok {
            return Err(BackendError::Api(format!(
                "users.conversations failed: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(Page::new(
            response.channels,
            next_cursor(response.response_metadata),
        ))
    }
}

#[async_trait]
impl HistoryService for SlackClient {
    async fn list_messages(
        &self,
        source_id: &str,
        oldest: Option<f64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<MessageRecord>> {
        let mut params = vec![
            ("channel", source_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        if let Some(oldest) = oldest {
            params.push(("oldest", format_oldest(oldest)));
        }

        let response: HistoryResponse = self.call("conversations.history", &params).await?;
        if !response.ok {
            return Err(BackendError::Api(format!(
                "conversations.history failed for {}: {}",
                source_id,
                response.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(Page::new(
            response.messages,
            next_cursor(response.response_metadata),
        ))
    }
}
