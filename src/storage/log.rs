use super::traits::StorageError;
use crate::backend::MessageRecord;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL history shared by every source.
///
/// Lines are never rewritten. Each call to [`OutputLog::append`] is synced to
/// disk before it returns, which is what allows the caller to advance the
/// source's watermark afterwards.
#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    file: File,
    /// The file does not end in a newline, so the next append must start one.
    needs_newline: bool,
}

impl OutputLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        let needs_newline = ends_mid_line(&path).map_err(|e| StorageError::io(&path, e))?;

        Ok(Self {
            path,
            file,
            needs_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records`, each tagged with `source_id`, one JSON object per line.
    pub fn append(&mut self, source_id: &str, records: &[MessageRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::with_capacity(records.len() * 256);
        if self.needs_newline {
            buf.push(b'\n');
        }
        for record in records {
            serde_json::to_writer(&mut buf, &record.tagged(source_id))?;
            buf.push(b'\n');
        }

        let file = &mut self.file;
        let start = file
            .metadata()
            .map_err(|e| StorageError::io(&self.path, e))?
            .len();
        let written = file
            .write_all(&buf)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            // Drop any partial line so the next append starts clean
            if let Err(truncate) = file.set_len(start) {
                tracing::warn!(path = %self.path.display(), error = %truncate, "Failed to roll back partial append");
                self.needs_newline = true;
            }
            return Err(StorageError::io(&self.path, e));
        }
        self.needs_newline = false;

        tracing::trace!(source_id, count = records.len(), "Appended records to output log");
        Ok(records.len())
    }
}

fn ends_mid_line(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
