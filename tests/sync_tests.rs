/// End-to-end tests for the sync loop against an in-memory workspace.
///
/// These cover:
/// - Watermarks advancing only after records reach the output log
/// - Resume from the stored watermark across restarts
/// - Crash between append and watermark save (at-least-once)
/// - Fail-fast vs skip-source handling of backend errors
/// - Publish results and the poll loop's shutdown path

use async_trait::async_trait;
use chansync::backend::{
    BackendError, DirectoryService, HistoryService, MessageRecord, Page, Result as BackendResult,
    SourceInfo,
};
use chansync::config::FetchErrorPolicy;
use chansync::publish::{PublishError, Publisher};
use chansync::storage::{FileWatermarkStore, OutputLog, StorageError, WatermarkStore};
use chansync::sync::{
    ChannelResolver, HistoryFetcher, OrchestratorSettings, PublishOutcome, RateLimitBackoff,
    SourceOutcome, SyncOrchestrator,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing_test::traced_test;

const NOW: f64 = 1_700_000_000.0;
const LOOKBACK: Duration = Duration::from_secs(30 * 24 * 3600);

/// Directory + history service over in-memory channels.
///
/// History pages are served newest-first and `oldest` is exclusive, like Slack.
#[derive(Default)]
struct FakeWorkspace {
    sources: Vec<SourceInfo>,
    messages: Mutex<HashMap<String, Vec<f64>>>,
    failing: Mutex<HashSet<String>>,
    history_calls: Mutex<Vec<(String, Option<f64>)>>,
}

impl FakeWorkspace {
    fn new(sources: Vec<SourceInfo>) -> Self {
        Self {
            sources,
            ..Default::default()
        }
    }

    fn post(&self, channel: &str, ts: f64) {
        self.messages
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(ts);
    }

    fn fail(&self, channel: &str) {
        self.failing.lock().unwrap().insert(channel.to_string());
    }

    fn heal(&self, channel: &str) {
        self.failing.lock().unwrap().remove(channel);
    }

    fn polled(&self) -> Vec<String> {
        self.history_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }
}

#[async_trait]
impl DirectoryService for FakeWorkspace {
    async fn list_accessible_sources(
        &self,
        _cursor: Option<&str>,
        _limit: usize,
    ) -> BackendResult<Page<SourceInfo>> {
        Ok(Page::last(self.sources.clone()))
    }
}

#[async_trait]
impl HistoryService for FakeWorkspace {
    async fn list_messages(
        &self,
        source_id: &str,
        oldest: Option<f64>,
        cursor: Option<&str>,
        limit: usize,
    ) -> BackendResult<Page<MessageRecord>> {
        self.history_calls
            .lock()
            .unwrap()
            .push((source_id.to_string(), oldest));

        if self.failing.lock().unwrap().contains(source_id) {
            return Err(BackendError::Api("channel_not_found".to_string()));
        }

        let mut matching: Vec<f64> = self
            .messages
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|ts| oldest.map_or(true, |o| *ts > o))
            .collect();
        matching.sort_by(|a, b| b.partial_cmp(a).unwrap());

        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (offset + limit).min(matching.len());
        let items = matching[offset..end]
            .iter()
            .map(|ts| MessageRecord::from(json!({"ts": format!("{ts:.6}"), "text": "msg"})))
            .collect();
        let next = (end < matching.len()).then(|| end.to_string());
        Ok(Page::new(items, next))
    }
}

/// Records every publish and flips shutdown after `stop_after` publishes.
struct RecordingPublisher {
    calls: Mutex<Vec<PathBuf>>,
    fail: bool,
    stop_after: Option<(usize, watch::Sender<bool>)>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
            stop_after: None,
        }
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, path: &Path) -> Result<String, PublishError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(path.to_path_buf());
            calls.len()
        };
        if let Some((limit, tx)) = &self.stop_after {
            if count >= *limit {
                let _ = tx.send(true);
            }
        }
        if self.fail {
            return Err(PublishError::EmptyOutput);
        }
        Ok(format!("0xdataset{count}"))
    }
}

/// Appends happen, then the "process dies" before the watermark is written.
struct CrashingWatermarks(FileWatermarkStore);

impl WatermarkStore for CrashingWatermarks {
    fn load(&self, source_id: &str) -> f64 {
        self.0.load(source_id)
    }

    fn save(&self, source_id: &str, _timestamp: f64) -> Result<bool, StorageError> {
        Err(StorageError::Io {
            path: source_id.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "simulated crash"),
        })
    }
}

struct Harness {
    dir: TempDir,
    workspace: Arc<FakeWorkspace>,
}

impl Harness {
    fn new(sources: Vec<SourceInfo>) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            workspace: Arc::new(FakeWorkspace::new(sources)),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("history.jsonl")
    }

    fn store(&self) -> FileWatermarkStore {
        FileWatermarkStore::with_clock(self.dir.path().join("state"), LOOKBACK, Arc::new(|| NOW))
            .unwrap()
    }

    fn orchestrator_with(
        &self,
        whitelist: &[&str],
        watermarks: Arc<dyn WatermarkStore>,
        policy: FetchErrorPolicy,
    ) -> SyncOrchestrator {
        let backoff = RateLimitBackoff::new(Duration::from_secs(1), None);
        SyncOrchestrator::new(
            whitelist.iter().map(|s| s.to_string()).collect(),
            ChannelResolver::new(self.workspace.clone(), 200, backoff),
            HistoryFetcher::new(self.workspace.clone(), 15, backoff),
            watermarks,
            OutputLog::open(self.log_path()).unwrap(),
            OrchestratorSettings {
                poll_interval: Duration::from_secs(3600),
                on_fetch_error: policy,
            },
        )
    }

    fn orchestrator(&self, whitelist: &[&str]) -> SyncOrchestrator {
        self.orchestrator_with(whitelist, Arc::new(self.store()), FetchErrorPolicy::AbortCycle)
    }

    fn log_lines(&self) -> Vec<Value> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn log_keys(&self) -> BTreeSet<(String, String)> {
        self.log_lines()
            .iter()
            .map(|v| (v["cid"].as_str().unwrap().to_string(), v["ts"].as_str().unwrap().to_string()))
            .collect()
    }
}

fn default_sources() -> Vec<SourceInfo> {
    vec![
        SourceInfo::channel("C1", "general"),
        SourceInfo::channel("C2", "random"),
        SourceInfo::direct("D1", "U9"),
    ]
}

#[tokio::test]
async fn test_first_cycle_appends_and_advances_watermarks() {
    let h = Harness::new(default_sources());
    for i in 0..20 {
        h.workspace.post("C1", NOW - 1000.0 + i as f64);
    }
    h.workspace.post("D1", NOW - 10.0);

    let mut orchestrator = h.orchestrator(&["general", "U9"]);
    let report = orchestrator.run_cycle().await.unwrap();

    assert!(!report.aborted);
    assert_eq!(report.new_records(), 21);
    assert_eq!(
        report.outcome("general"),
        Some(&SourceOutcome::Synced { count: 20, high_watermark: NOW - 981.0 })
    );
    assert_eq!(
        report.outcome("U9"),
        Some(&SourceOutcome::Synced { count: 1, high_watermark: NOW - 10.0 })
    );

    let lines = h.log_lines();
    assert_eq!(lines.len(), 21);
    assert!(lines.iter().filter(|l| l["cid"] == "C1").count() == 20);
    assert!(lines.iter().any(|l| l["cid"] == "D1"));

    let store = h.store();
    assert_eq!(store.load("C1"), NOW - 981.0);
    assert_eq!(store.load("D1"), NOW - 10.0);

    // First poll bounded by the lookback window
    let calls = h.workspace.history_calls.lock().unwrap().clone();
    assert_eq!(calls[0], ("C1".to_string(), Some(NOW - LOOKBACK.as_secs_f64())));
}

#[tokio::test]
async fn test_second_cycle_only_fetches_new_messages() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 50.0);

    let mut orchestrator = h.orchestrator(&["general"]);
    orchestrator.run_cycle().await.unwrap();

    h.workspace.post("C1", NOW - 20.0);
    h.workspace.post("C1", NOW - 5.0);
    let report = orchestrator.run_cycle().await.unwrap();

    assert_eq!(
        report.outcome("general"),
        Some(&SourceOutcome::Synced { count: 2, high_watermark: NOW - 5.0 })
    );
    assert_eq!(h.log_lines().len(), 3);
}

#[tokio::test]
async fn test_quiet_source_keeps_watermark_untouched() {
    let h = Harness::new(default_sources());
    let mut orchestrator = h.orchestrator(&["random"]);

    let report = orchestrator.run_cycle().await.unwrap();
    let lookback_default = NOW - LOOKBACK.as_secs_f64();
    assert_eq!(
        report.outcome("random"),
        Some(&SourceOutcome::Synced { count: 0, high_watermark: lookback_default })
    );
    assert!(!h.dir.path().join("state/C2.ts").exists());
}

#[tokio::test]
async fn test_restart_resumes_from_saved_watermark() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 30.0);
    h.orchestrator(&["general"]).run_cycle().await.unwrap();

    h.workspace.post("C1", NOW - 1.0);
    let mut restarted = h.orchestrator(&["general"]);
    let report = restarted.run_cycle().await.unwrap();

    assert_eq!(report.new_records(), 1);
    let calls = h.workspace.history_calls.lock().unwrap().clone();
    assert_eq!(calls.last().unwrap().1, Some(NOW - 30.0));
    assert_eq!(h.log_lines().len(), 2);
}

#[tokio::test]
async fn test_crash_before_watermark_save_refetches_without_loss() {
    let h = Harness::new(default_sources());
    for i in 0..5 {
        h.workspace.post("C1", NOW - 100.0 + i as f64);
    }

    let crashing = Arc::new(CrashingWatermarks(h.store()));
    let report = h
        .orchestrator_with(&["general"], crashing, FetchErrorPolicy::AbortCycle)
        .run_cycle()
        .await
        .unwrap();
    assert!(matches!(report.outcome("general"), Some(SourceOutcome::Failed { .. })));

    let before = h.log_keys();
    assert_eq!(before.len(), 5);
    assert_eq!(h.store().load("C1"), NOW - LOOKBACK.as_secs_f64());

    // Restart: the unmoved watermark re-fetches a superset
    h.workspace.post("C1", NOW - 2.0);
    let report = h.orchestrator(&["general"]).run_cycle().await.unwrap();
    assert_eq!(
        report.outcome("general"),
        Some(&SourceOutcome::Synced { count: 6, high_watermark: NOW - 2.0 })
    );

    let after = h.log_keys();
    assert!(after.is_superset(&before));
    assert_eq!(after.len(), 6);
    // Duplicates are expected and tolerated
    assert_eq!(h.log_lines().len(), 11);
}

#[tokio::test]
async fn test_unresolved_entries_are_skipped_every_cycle() {
    let h = Harness::new(default_sources());
    h.workspace.post("C2", NOW - 3.0);
    let mut orchestrator = h.orchestrator(&["missing", "random"]);

    for _ in 0..2 {
        let report = orchestrator.run_cycle().await.unwrap();
        assert_eq!(report.outcome("missing"), Some(&SourceOutcome::Skipped));
        assert!(matches!(report.outcome("random"), Some(SourceOutcome::Synced { .. })));
        assert!(!report.aborted);
    }
    assert_eq!(h.workspace.polled(), vec!["C2", "C2"]);
}

#[tokio::test]
#[traced_test]
async fn test_backend_error_aborts_rest_of_cycle_by_default() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 3.0);
    h.workspace.post("C2", NOW - 3.0);
    h.workspace.post("D1", NOW - 3.0);
    h.workspace.fail("C2");

    let publisher = Arc::new(RecordingPublisher::new());
    let mut orchestrator = h
        .orchestrator(&["general", "random", "U9"])
        .with_publisher(publisher.clone());
    let report = orchestrator.run_cycle().await.unwrap();

    assert!(report.aborted);
    assert!(matches!(report.outcome("general"), Some(SourceOutcome::Synced { count: 1, .. })));
    assert!(matches!(report.outcome("random"), Some(SourceOutcome::Failed { .. })));
    assert_eq!(report.outcome("U9"), Some(&SourceOutcome::NotPolled));
    assert_eq!(h.workspace.polled(), vec!["C1", "C2"]);
    assert!(logs_contain("Not polled, cycle aborted by an earlier failure"));
    assert!(logs_contain("entry=U9"));

    // The cycle still publishes
    assert_eq!(publisher.calls.lock().unwrap().len(), 1);

    // Next cycle picks the remaining sources up
    h.workspace.heal("C2");
    let report = orchestrator.run_cycle().await.unwrap();
    assert!(!report.aborted);
    assert!(matches!(report.outcome("random"), Some(SourceOutcome::Synced { count: 1, .. })));
    assert!(matches!(report.outcome("U9"), Some(SourceOutcome::Synced { count: 1, .. })));
    assert!(matches!(report.outcome("general"), Some(SourceOutcome::Synced { count: 0, .. })));
}

#[tokio::test]
async fn test_skip_source_policy_isolates_failures() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 3.0);
    h.workspace.post("D1", NOW - 3.0);
    h.workspace.fail("C1");

    let mut orchestrator =
        h.orchestrator_with(&["general", "U9"], Arc::new(h.store()), FetchErrorPolicy::SkipSource);
    let report = orchestrator.run_cycle().await.unwrap();

    assert!(!report.aborted);
    assert!(matches!(report.outcome("general"), Some(SourceOutcome::Failed { .. })));
    assert!(matches!(report.outcome("U9"), Some(SourceOutcome::Synced { count: 1, .. })));
    assert_eq!(h.store().load("C1"), NOW - LOOKBACK.as_secs_f64());
}

#[tokio::test]
async fn test_publish_result_and_failure_are_reported() {
    let h = Harness::new(default_sources());
    let publisher = Arc::new(RecordingPublisher::new());
    let mut orchestrator = h.orchestrator(&["general"]).with_publisher(publisher.clone());

    let report = orchestrator.run_cycle().await.unwrap();
    assert_eq!(report.publish, PublishOutcome::Published("0xdataset1".to_string()));
    assert_eq!(publisher.calls.lock().unwrap()[0], h.log_path());

    let failing = Arc::new(RecordingPublisher {
        fail: true,
        ..RecordingPublisher::new()
    });
    let mut orchestrator = h.orchestrator(&["general"]).with_publisher(failing);
    let report = orchestrator.run_cycle().await.unwrap();
    assert!(matches!(report.publish, PublishOutcome::Failed(_)));

    let report = h.orchestrator(&["general"]).run_cycle().await.unwrap();
    assert_eq!(report.publish, PublishOutcome::NotConfigured);
}

#[tokio::test]
async fn test_resolution_happens_once() {
    let h = Harness::new(default_sources());
    let mut orchestrator = h.orchestrator(&["general", "U9", "missing"]);

    let resolved = orchestrator.resolve().await.unwrap().clone();
    assert_eq!(resolved.get("general"), Some(Some("C1")));
    assert_eq!(resolved.get("U9"), Some(Some("D1")));
    assert_eq!(resolved.get("missing"), Some(None));

    orchestrator.run_cycle().await.unwrap();
    assert_eq!(orchestrator.resolved(), Some(&resolved));
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_sleeps_between_cycles_and_stops_on_shutdown() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 3.0);

    let (tx, rx) = watch::channel(false);
    let publisher = Arc::new(RecordingPublisher {
        stop_after: Some((3, tx)),
        ..RecordingPublisher::new()
    });
    let mut orchestrator = h.orchestrator(&["general"]).with_publisher(publisher.clone());

    let start = tokio::time::Instant::now();
    orchestrator.run(rx).await.unwrap();

    assert_eq!(publisher.calls.lock().unwrap().len(), 3);
    // Two full sleeps separate three cycles
    assert!(start.elapsed() >= Duration::from_secs(2 * 3600));
    assert!(start.elapsed() < Duration::from_secs(3 * 3600));
    assert_eq!(h.workspace.polled().len(), 3);
    assert_eq!(h.log_lines().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_keeps_polling_when_shutdown_sender_is_gone() {
    let h = Harness::new(default_sources());
    h.workspace.post("C1", NOW - 3.0);

    let publisher = Arc::new(RecordingPublisher::new());
    let mut orchestrator = h.orchestrator(&["general"]).with_publisher(publisher.clone());

    let (tx, rx) = watch::channel(false);
    drop(tx);

    let outcome = tokio::time::timeout(
        Duration::from_secs(3 * 3600 + 60),
        orchestrator.run(rx),
    )
    .await;

    assert!(outcome.is_err(), "loop exited without a shutdown request");
    // Cycles at 0h, 1h, 2h and 3h
    assert_eq!(publisher.calls.lock().unwrap().len(), 4);
    assert_eq!(h.log_lines().len(), 1);
}
