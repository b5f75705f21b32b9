//! Recording answered questions.
//!
//! After each successful answer the pipeline hands an [`InteractionRecord`]
//! to an [`InteractionLog`]. The log is an external collaborator: its
//! failures are reported but never change the answer.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{RagError, Result};

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Opaque identifier of the asking user.
    pub user_id: String,
    /// The question as asked.
    pub question: String,
    /// The answer returned to the user.
    pub answer_text: String,
    /// When the answer was produced.
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        question: impl Into<String>,
        answer_text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            question: question.into(),
            answer_text: answer_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A sink for interaction records.
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Store one record.
    async fn append(&self, record: &InteractionRecord) -> Result<()>;
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInteractionLog;

#[async_trait]
impl InteractionLog for NoopInteractionLog {
    async fn append(&self, _record: &InteractionRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding applications.
#[derive(Debug, Default)]
pub struct InMemoryInteractionLog {
    records: Mutex<Vec<InteractionRecord>>,
}

impl InMemoryInteractionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the records appended so far.
    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl InteractionLog for InMemoryInteractionLog {
    async fn append(&self, record: &InteractionRecord) -> Result<()> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        Ok(())
    }
}

/// Appends records to a JSON-lines file, one object per line.
#[derive(Debug)]
pub struct JsonlInteractionLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlInteractionLog {
    /// Log to `path`. The file and its parent directory are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: tokio::sync::Mutex::new(()) }
    }

    /// The file records are written to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InteractionLog for JsonlInteractionLog {
    async fn append(&self, record: &InteractionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| RagError::InteractionLogError(format!("failed to encode record: {e}")))?;
        line.push('\n');

        let failed = |e: std::io::Error| {
            RagError::InteractionLogError(format!("{}: {e}", self.path.display()))
        };

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(failed)?;
        file.write_all(line.as_bytes()).await.map_err(failed)?;
        file.flush().await.map_err(failed)?;
        Ok(())
    }
}
