use super::traits::{StorageError, WatermarkStore};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Current time as fractional Unix seconds.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_micros() as f64 / 1_000_000.0)
}

/// Watermarks stored as one `<source_id>.ts` file per source.
///
/// Each file holds a single decimal timestamp with microsecond precision.
pub struct FileWatermarkStore {
    dir: PathBuf,
    lookback: Duration,
    clock: Clock,
}

impl std::fmt::Debug for FileWatermarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatermarkStore")
            .field("dir", &self.dir)
            .field("lookback", &self.lookback)
            .finish()
    }
}

impl FileWatermarkStore {
    /// Open (creating if needed) the state directory.
    pub fn open(dir: impl Into<PathBuf>, lookback: Duration) -> Result<Self, StorageError> {
        Self::with_clock(dir, lookback, system_clock())
    }

    pub fn with_clock(
        dir: impl Into<PathBuf>,
        lookback: Duration,
        clock: Clock,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self {
            dir,
            lookback,
            clock,
        })
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{}.ts", file_stem(source_id)))
    }

    /// `now - lookback`: the resume point for a source with no usable state.
    pub fn default_watermark(&self) -> f64 {
        (self.clock)() - self.lookback.as_secs_f64()
    }

    /// The stored value, if the file exists and parses as a finite number.
    pub fn read_stored(&self, source_id: &str) -> Option<f64> {
        let path = self.path_for(source_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable watermark file");
                return None;
            }
        };

        match text.trim().parse::<f64>() {
            Ok(ts) if ts.is_finite() => Some(ts),
            _ => {
                tracing::warn!(
                    path = %path.display(),
                    content = %text.trim(),
                    "Corrupt watermark file, falling back to lookback window"
                );
                None
            }
        }
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let tmp = path.with_extension("ts.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        // Make the rename itself durable
        File::open(&self.dir)?.sync_all()
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self, source_id: &str) -> f64 {
        self.read_stored(source_id)
            .unwrap_or_else(|| self.default_watermark())
    }

    fn save(&self, source_id: &str, timestamp: f64) -> Result<bool, StorageError> {
        if !timestamp.is_finite() || timestamp <= 0.0 {
            tracing::debug!(source_id, timestamp, "Discarding invalid watermark");
            return Ok(false);
        }

        if let Some(stored) = self.read_stored(source_id) {
            if timestamp <= stored {
                return Ok(false);
            }
        }

        let path = self.path_for(source_id);
        self.write_atomic(&path, &format!("{:.6}", timestamp))
            .map_err(|e| StorageError::io(&path, e))?;
        tracing::debug!(source_id, timestamp, "Watermark saved");
        Ok(true)
    }
}

/// Keep ids from escaping the state directory.
fn file_stem(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
