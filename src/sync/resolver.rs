use super::backoff::RateLimitBackoff;
use crate::backend::{BackendError, DirectoryService, SourceInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("directory listing failed: {0}")]
    Directory(#[from] BackendError),
}

/// One whitelist entry and the conversation it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub entry: String,
    pub source_id: Option<String>,
}

/// Whitelist entries mapped to conversation ids, in whitelist order.
///
/// Built once per process. Two entries may resolve to the same id; they are
/// not merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSources {
    entries: Vec<ResolvedEntry>,
}

impl ResolvedSources {
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `None` if the entry is not in the whitelist, `Some(None)` if it did not resolve.
    pub fn get(&self, entry: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|e| e.entry == entry)
            .map(|e| e.source_id.as_deref())
    }

    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.source_id.is_some()).count()
    }
}

impl FromIterator<(String, Option<String>)> for ResolvedSources {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let entries = iter
            .into_iter()
            .filter(|(entry, _)| seen.insert(entry.clone()))
            .map(|(entry, source_id)| ResolvedEntry { entry, source_id })
            .collect();
        Self { entries }
    }
}

/// Turns whitelist names and ids into conversation ids using the directory listing.
pub struct ChannelResolver {
    directory: Arc<dyn DirectoryService>,
    page_size: usize,
    backoff: RateLimitBackoff,
}

impl ChannelResolver {
    pub fn new(directory: Arc<dyn DirectoryService>, page_size: usize, backoff: RateLimitBackoff) -> Self {
        Self {
            directory,
            page_size,
            backoff,
        }
    }

    pub async fn resolve(&self, whitelist: &[String]) -> Result<ResolvedSources, ResolveError> {
        let sources = self.list_all().await?;
        tracing::info!(accessible = sources.len(), "Fetched accessible conversations");

        let lookup = build_lookup(&sources);
        let resolved: ResolvedSources = whitelist
            .iter()
            .map(|entry| (entry.clone(), lookup.get(entry.as_str()).map(|id| id.to_string())))
            .collect();

        for entry in resolved.iter() {
            match &entry.source_id {
                Some(id) => tracing::debug!(entry = %entry.entry, source_id = %id, "Resolved whitelist entry"),
                None => tracing::warn!(entry = %entry.entry, "Whitelist entry not found or not accessible"),
            }
        }

        Ok(resolved)
    }

    async fn list_all(&self) -> Result<Vec<SourceInfo>, BackendError> {
        let mut sources = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .backoff
                .retry("users.conversations", || {
                    self.directory
                        .list_accessible_sources(cursor.as_deref(), self.page_size)
                })
                .await?;

            sources.extend(page.items);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(sources)
    }
}

/// Index conversations by id, by name, and for 1:1 DMs by the other user's id.
/// Later listings win on key collisions.
fn build_lookup(sources: &[SourceInfo]) -> HashMap<&str, &str> {
    let mut lookup = HashMap::new();
    for source in sources {
        let id = source.id.as_str();
        lookup.insert(id, id);

        if let Some(name) = &source.name {
            lookup.insert(name.as_str(), id);
        }

        if source.is_im {
            if let Some(user) = &source.user {
                lookup.insert(user.as_str(), id);
            }
        }
    }
    lookup
}
