use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RecordFields, RecordStore, StoredRecord};
use crate::error::AgentError;

/// Append-only JSON-lines record file, one [`StoredRecord`] per line.
pub struct FileStore {
    path: PathBuf,
    // Serializes appends from concurrent Phase 2 tasks.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<StoredRecord>, AgentError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping unreadable record"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn create_record(&self, fields: &RecordFields) -> Result<String, AgentError> {
        let record = StoredRecord {
            id: format!("rec{}", Uuid::new_v4().simple()),
            created_time: Some(Utc::now().to_rfc3339()),
            fields: fields.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(record_id = %record.id, module = %fields.module, "record appended");
        Ok(record.id)
    }

    async fn query_by_date(&self, date: &str) -> Result<Vec<StoredRecord>, AgentError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.fields.date == date);
        Ok(records)
    }

    async fn query_by_module(&self, module: &str) -> Result<Vec<StoredRecord>, AgentError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.fields.module == module);
        Ok(records)
    }
}
