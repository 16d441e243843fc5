use super::backoff::RateLimitBackoff;
use crate::backend::{BackendError, HistoryService, MessageRecord};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetching history for {source_id} failed: {source}")]
    Backend {
        source_id: String,
        #[source]
        source: BackendError,
    },
}

/// Retrieves every message newer than a watermark for one conversation.
pub struct HistoryFetcher {
    history: Arc<dyn HistoryService>,
    page_size: usize,
    backoff: RateLimitBackoff,
}

impl HistoryFetcher {
    pub fn new(history: Arc<dyn HistoryService>, page_size: usize, backoff: RateLimitBackoff) -> Self {
        Self {
            history,
            page_size,
            backoff,
        }
    }

    /// Collect all pages after `watermark` into memory.
    ///
    /// A missing or non-positive watermark omits the lower bound entirely.
    /// Pages may arrive in any order, so callers must not assume the last
    /// record carries the highest timestamp.
    pub async fn fetch_since(
        &self,
        source_id: &str,
        watermark: Option<f64>,
    ) -> Result<Vec<MessageRecord>, FetchError> {
        let oldest = watermark.filter(|w| *w > 0.0);
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .backoff
                .retry(source_id, || {
                    self.history
                        .list_messages(source_id, oldest, cursor.as_deref(), self.page_size)
                })
                .await
                .map_err(|source| FetchError::Backend {
                    source_id: source_id.to_string(),
                    source,
                })?;

            pages += 1;
            collected.extend(page.items);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(source_id, pages, messages = collected.len(), "Fetched history");
        Ok(collected)
    }
}

/// Highest timestamp among `records`, never below `floor`.
pub fn high_watermark(floor: f64, records: &[MessageRecord]) -> f64 {
    records
        .iter()
        .filter_map(MessageRecord::timestamp)
        .fold(floor, f64::max)
}
