use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Per-source resume points.
///
/// Exactly one writer mutates a given source's watermark, so implementations
/// need no locking beyond what makes a single write crash-safe.
pub trait WatermarkStore: Send + Sync {
    /// The recorded watermark, or the lookback default when nothing usable is stored.
    fn load(&self, source_id: &str) -> f64;

    /// Record `timestamp` if it is finite, positive and above the stored value.
    ///
    /// Returns whether the stored value changed.
    fn save(&self, source_id: &str, timestamp: f64) -> Result<bool, StorageError>;
}
