pub mod backoff;
pub mod fetcher;
pub mod orchestrator;
pub mod resolver;

pub use backoff::RateLimitBackoff;
pub use fetcher::{FetchError, HistoryFetcher};
pub use orchestrator::{
    CycleReport, OrchestratorSettings, PublishOutcome, SourceOutcome, SourceReport,
    SyncError, SyncOrchestrator,
};
pub use resolver::{ChannelResolver, ResolveError, ResolvedEntry, ResolvedSources};
