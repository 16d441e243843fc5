use super::backoff::RateLimitBackoff;
use super::fetcher::{high_watermark, FetchError, HistoryFetcher};
use super::resolver::{ChannelResolver, ResolveError, ResolvedSources};
use crate::backend::SlackClient;
use crate::config::{Config, FetchErrorPolicy};
use crate::publish::{CommandPublisher, Publisher};
use crate::storage::{FileWatermarkStore, OutputLog, StorageError, WatermarkStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("channel resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60 * 60),
            on_fetch_error: FetchErrorPolicy::AbortCycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// The whitelist entry did not resolve to a conversation.
    Skipped,
    Synced { count: usize, high_watermark: f64 },
    Failed { error: String },
    /// An earlier source failed and the cycle was aborted.
    NotPolled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub entry: String,
    pub source_id: Option<String>,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    NotConfigured,
    Published(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub aborted: bool,
    pub publish: PublishOutcome,
}

impl CycleReport {
    pub fn new_records(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Synced { count, .. } => count,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, entry: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|s| s.entry == entry)
            .map(|s| &s.outcome)
    }
}

/// Drives poll cycles: resolve once, then per source load watermark, fetch,
/// append, save watermark; publish; sleep; repeat.
///
/// Records for a source are synced to the output log before its watermark
/// moves, so a crash in between re-fetches rather than loses messages.
pub struct SyncOrchestrator {
    whitelist: Vec<String>,
    resolver: ChannelResolver,
    fetcher: HistoryFetcher,
    watermarks: Arc<dyn WatermarkStore>,
    log: OutputLog,
    publisher: Option<Arc<dyn Publisher>>,
    settings: OrchestratorSettings,
    resolved: Option<ResolvedSources>,
}

impl SyncOrchestrator {
    pub fn new(
        whitelist: Vec<String>,
        resolver: ChannelResolver,
        fetcher: HistoryFetcher,
        watermarks: Arc<dyn WatermarkStore>,
        log: OutputLog,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            whitelist,
            resolver,
            fetcher,
            watermarks,
            log,
            publisher: None,
            settings,
            resolved: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Wire up the Slack-backed stack described by `config`.
    pub fn from_config(
        config: &Config,
        client: Arc<SlackClient>,
        whitelist: Vec<String>,
    ) -> Result<Self, StorageError> {
        let backoff = RateLimitBackoff::new(
            config.sync.rate_limit_fallback,
            config.sync.max_rate_limit_wait,
        );
        let resolver = ChannelResolver::new(client.clone(), config.sync.directory_page_size, backoff);
        let fetcher = HistoryFetcher::new(client, config.sync.page_size, backoff);
        let watermarks = Arc::new(FileWatermarkStore::open(&config.state_dir, config.sync.lookback)?);
        let log = OutputLog::open(&config.output)?;
        let settings = OrchestratorSettings {
            poll_interval: config.sync.poll_interval,
            on_fetch_error: config.sync.on_fetch_error,
        };

        let orchestrator = Self::new(whitelist, resolver, fetcher, watermarks, log, settings);
        Ok(
            match config.publish.as_ref().and_then(|p| CommandPublisher::new(&p.command)) {
                Some(publisher) => orchestrator.with_publisher(Arc::new(publisher)),
                None => orchestrator,
            },
        )
    }

    pub fn resolved(&self) -> Option<&ResolvedSources> {
        self.resolved.as_ref()
    }

    /// Resolve the whitelist. Only the first call talks to the directory.
    pub async fn resolve(&mut self) -> Result<&ResolvedSources, SyncError> {
        let resolved = match self.resolved.take() {
            Some(resolved) => resolved,
            None => {
                info!(entries = self.whitelist.len(), "Resolving channel whitelist");
                let resolved = self.resolver.resolve(&self.whitelist).await?;
                info!(
                    entries = resolved.len(),
                    resolved = resolved.resolved_count(),
                    "Channel whitelist resolved"
                );
                resolved
            }
        };
        Ok(&*self.resolved.insert(resolved))
    }

    /// One sweep over every whitelist entry followed by a publish.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let resolved = self.resolve().await?.clone();
        let mut sources = Vec::with_capacity(resolved.len());
        let mut aborted = false;

        for entry in resolved.iter() {
            let outcome = if aborted {
                warn!(entry = %entry.entry, "Not polled, cycle aborted by an earlier failure");
                SourceOutcome::NotPolled
            } else {
                match &entry.source_id {
                    None => {
                        warn!(entry = %entry.entry, "Not found or not a member, skipping");
                        SourceOutcome::Skipped
                    }
                    Some(source_id) => match self.sync_source(&entry.entry, source_id).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(entry = %entry.entry, source_id = %source_id, error = %e, "Source sync failed");
                            if self.settings.on_fetch_error == FetchErrorPolicy::AbortCycle {
                                warn!("Aborting remaining sources for this cycle");
                                aborted = true;
                            }
                            SourceOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    },
                }
            };

            sources.push(SourceReport {
                entry: entry.entry.clone(),
                source_id: entry.source_id.clone(),
                outcome,
            });
        }

        let publish = self.publish().await;

        Ok(CycleReport {
            sources,
            aborted,
            publish,
        })
    }

    async fn sync_source(&mut self, entry: &str, source_id: &str) -> Result<SourceOutcome, SyncError> {
        let oldest = self.watermarks.load(source_id);
        let messages = self.fetcher.fetch_since(source_id, Some(oldest)).await?;

        let count = self.log.append(source_id, &messages)?;
        let latest = high_watermark(oldest, &messages);

        if latest > oldest {
            self.watermarks.save(source_id, latest)?;
        }

        info!(
            entry,
            source_id,
            new_messages = count,
            up_to = %format_timestamp(latest),
            "Source synced"
        );

        Ok(SourceOutcome::Synced {
            count,
            high_watermark: latest,
        })
    }

    async fn publish(&self) -> PublishOutcome {
        let Some(publisher) = &self.publisher else {
            debug!("No publisher configured");
            return PublishOutcome::NotConfigured;
        };

        match publisher.publish(self.log.path()).await {
            Ok(address) => {
                info!(address = %address, path = %self.log.path().display(), "Published history");
                PublishOutcome::Published(address)
            }
            Err(e) => {
                error!(error = %e, path = %self.log.path().display(), "Publishing history failed");
                PublishOutcome::Failed(e.to_string())
            }
        }
    }

    /// Resolve once, then poll forever until `shutdown` flips to true.
    ///
    /// Resolution failure is returned; per-cycle failures are logged and the
    /// loop carries on after the usual sleep. A dropped sender means nothing
    /// can request shutdown any more, and the loop keeps polling.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        self.resolve().await?;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(report) => info!(
                        sources = report.sources.len(),
                        new_messages = report.new_records(),
                        aborted = report.aborted,
                        "Poll cycle complete"
                    ),
                    Err(e) => error!(error = %e, "Poll cycle failed"),
                },
                Ok(()) = shutdown.changed() => {
                    info!("Shutdown requested during poll cycle");
                    break;
                }
            }

            info!(interval = ?self.settings.poll_interval, "Done, sleeping");
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                Ok(()) = shutdown.changed() => break,
            }
        }

        info!("Sync loop stopped");
        Ok(())
    }
}

fn format_timestamp(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string())
        .unwrap_or_else(|| format!("{ts:.6}"))
}
