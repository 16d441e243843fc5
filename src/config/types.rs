use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub slack: SlackConfig,
    /// Plain-text list of channel names, channel IDs or user IDs
    pub whitelist: PathBuf,
    /// Append-only JSONL history file
    pub output: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".state")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_lookback", with = "humantime_serde")]
    pub lookback: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_directory_page_size")]
    pub directory_page_size: usize,
    #[serde(default = "default_rate_limit_fallback", with = "humantime_serde")]
    pub rate_limit_fallback: Duration,
    /// Upper bound for a single rate-limit sleep. Unset means the backend's
    /// Retry-After is always honoured in full.
    #[serde(default, with = "humantime_serde")]
    pub max_rate_limit_wait: Option<Duration>,
    #[serde(default)]
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            lookback: default_lookback(),
            page_size: default_page_size(),
            directory_page_size: default_directory_page_size(),
            rate_limit_fallback: default_rate_limit_fallback(),
            max_rate_limit_wait: None,
            on_fetch_error: FetchErrorPolicy::default(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_lookback() -> Duration {
    Duration::from_secs(60 * 60 * 24 * 30)
}

fn default_page_size() -> usize {
    15
}

fn default_directory_page_size() -> usize {
    200
}

fn default_rate_limit_fallback() -> Duration {
    Duration::from_secs(60)
}

/// What a poll cycle does when fetching one source fails with a
/// non-rate-limit backend error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorPolicy {
    /// Stop the cycle; remaining sources wait for the next poll.
    #[default]
    AbortCycle,
    /// Log the failure and continue with the next source.
    SkipSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Program and arguments; the output log path is appended as the last argument.
    pub command: Vec<String>,
}
