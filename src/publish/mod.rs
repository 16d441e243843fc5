//! Hand-off of the finished history file to a downstream service.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to spawn publisher '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("publisher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("publisher produced no address")]
    EmptyOutput,
}

/// Publishes a file and returns the address it was published under.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, path: &Path) -> Result<String, PublishError>;
}

/// Runs an external program with the file path appended to its arguments.
/// Trimmed stdout is the address.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    program: String,
    args: Vec<String>,
}

impl CommandPublisher {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, path: &Path) -> Result<String, PublishError> {
        tracing::debug!(program = %self.program, path = %path.display(), "Running publisher");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PublishError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PublishError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let address = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if address.is_empty() {
            return Err(PublishError::EmptyOutput);
        }
        Ok(address)
    }
}
