//! JSONL alert log - one JSON object per line

use crate::domain::types::AlertEvent;
use crate::services::dispatcher::{AlertSink, SinkError};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct JsonlSink {
    file_path: PathBuf,
}

impl JsonlSink {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        info!(file_path = %file_path.display(), "jsonl_sink_initialized");
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append a line to the alert log
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = self.file_path.as_path();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %path.display(), bytes = %line.len(), "alert_written");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let json = event.to_json()?;
        self.append_line(&json)?;
        Ok(())
    }
}
