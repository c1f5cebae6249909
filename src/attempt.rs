use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgentError;
use crate::store::RecordStatus;

/// Portal login for one attempt. Never serialized; `Debug` hides the password.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields must be non-empty after trimming.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.username.trim().is_empty() {
            return Err(AgentError::Validation("username must not be empty".into()));
        }
        if self.password.trim().is_empty() {
            return Err(AgentError::Validation("password must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which daily session the submitted link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// An expired code recovered by changing its trailing digit.
    Morning,
    /// A code derived from the morning code by the evening offset.
    Evening,
}

impl SessionKind {
    /// Caption rendered alongside the QR code.
    pub fn label(self, module: &str) -> String {
        match self {
            SessionKind::Morning => format!("{module} - Attendance"),
            SessionKind::Evening => format!("{module} - Evening Session"),
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Morning => write!(f, "morning"),
            SessionKind::Evening => write!(f, "evening"),
        }
    }
}

/// Tracks the lifecycle status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

impl From<AttemptStatus> for RecordStatus {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Pending => RecordStatus::Pending,
            AttemptStatus::Success => RecordStatus::Success,
            AttemptStatus::Failed => RecordStatus::Failed,
        }
    }
}

/// Caller input for one submission.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub link: String,
    pub module_name: String,
    pub credentials: Credentials,
}

impl AttemptRequest {
    /// Applies the boundary rules: portal link prefix, module name and
    /// credentials present.
    pub fn validate(&self, link_prefix: &str) -> Result<(), AgentError> {
        if !self.link.starts_with(link_prefix) {
            return Err(AgentError::Validation(format!(
                "Invalid QR link format - expected a link starting with {link_prefix}"
            )));
        }
        if self.module_name.trim().is_empty() {
            return Err(AgentError::Validation("module name must not be empty".into()));
        }
        self.credentials.validate()
    }
}

/// One attendance attempt, from Phase 1 to its terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceAttempt {
    pub id: String,
    pub kind: SessionKind,
    pub original_link: String,
    pub converted_link: String,
    pub module_name: String,
    #[serde(skip)]
    pub credentials: Credentials,
    pub phase: u8,
    pub status: AttemptStatus,
    pub message: String,
    pub screenshot_path: Option<PathBuf>,
    pub record_id: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl AttendanceAttempt {
    pub fn new(
        kind: SessionKind,
        request: &AttemptRequest,
        converted_link: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            original_link: request.link.clone(),
            converted_link,
            module_name: request.module_name.trim().to_string(),
            credentials: request.credentials.clone(),
            phase: 1,
            status: AttemptStatus::Pending,
            message: String::new(),
            screenshot_path: None,
            record_id: None,
            timestamp: Local::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AttemptStatus::Pending
    }
}
