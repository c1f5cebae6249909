//! Audit records for attendance attempts.
//!
//! [`RecordStore`] is the persistence seam: Phase 2 appends exactly one record
//! per attempt, reporting commands query them back by date or module.

mod airtable;
mod file;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub use airtable::AirtableStore;
pub use file::FileStore;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Terminal or pending status of an attempt as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failed,
    Pending,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Success => write!(f, "success"),
            RecordStatus::Failed => write!(f, "failed"),
            RecordStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Field set of one audit record, named as the columns of the attendance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(rename = "Module Name")]
    pub module: String,
    #[serde(rename = "Original QR Link")]
    pub original_link: String,
    #[serde(rename = "Converted QR Link", default, skip_serializing_if = "Option::is_none")]
    pub converted_link: Option<String>,
    #[serde(rename = "Evening QR Link", default, skip_serializing_if = "Option::is_none")]
    pub evening_link: Option<String>,
    #[serde(rename = "Screenshot", default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(rename = "Date")]
    pub date: String,
    /// `YYYY-MM-DD HH:MM:SS`
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Status")]
    pub status: RecordStatus,
}

impl RecordFields {
    /// Builds a record stamped with the date and time of `at`.
    pub fn new(module: &str, original_link: &str, status: RecordStatus, at: DateTime<Local>) -> Self {
        Self {
            module: module.to_string(),
            original_link: original_link.to_string(),
            converted_link: None,
            evening_link: None,
            screenshot: None,
            date: at.format("%Y-%m-%d").to_string(),
            timestamp: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
        }
    }
}

/// A record as returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    pub fields: RecordFields,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Appends a record and returns its id.
    async fn create_record(&self, fields: &RecordFields) -> Result<String, AgentError>;

    /// Records whose `Date` equals `date` (`YYYY-MM-DD`).
    async fn query_by_date(&self, date: &str) -> Result<Vec<StoredRecord>, AgentError>;

    /// Records whose module name matches `module` exactly.
    async fn query_by_module(&self, module: &str) -> Result<Vec<StoredRecord>, AgentError>;
}

/// Picks Airtable when it is configured, otherwise the local records file.
pub fn from_config(config: &AgentConfig) -> Arc<dyn RecordStore> {
    if config.airtable.is_configured() {
        tracing::info!(base = %config.airtable.base_id, "using Airtable record store");
        Arc::new(AirtableStore::new(&config.airtable))
    } else {
        tracing::info!(path = %config.records_file.display(), "using local record store");
        Arc::new(FileStore::new(&config.records_file))
    }
}
