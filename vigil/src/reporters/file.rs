use super::Reporter;
use crate::message::LogEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Reporter that appends log entries to a file, one JSON object per line.
pub struct FileReporter {
    file_path: PathBuf,
}

impl FileReporter {
    /// Creates a new FileReporter instance.
    ///
    /// # Arguments
    /// * `file_path` - Path to the log file where entries will be appended
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn report(&self, entry: &LogEntry) -> Result<()> {
        let log_line = format!("{}\n", serde_json::to_string(entry)?);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .with_context(|| format!("Failed to open log file: {}", self.file_path.display()))?;

        file.write_all(log_line.as_bytes())
            .await
            .with_context(|| "Failed to write to log file")?;

        file.flush()
            .await
            .with_context(|| "Failed to flush log file")?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
