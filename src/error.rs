use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Format(String),

    #[error("{0}")]
    DriverInit(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    ElementNotFound(String),

    #[error("Failed to generate QR code: {0}")]
    Render(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("WebDriver error ({error}): {message}")]
    Browser { error: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Classifies the error for attempt outcomes and audit records.
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::Validation(_) => ErrorClass::Validation,
            AgentError::Format(_) => ErrorClass::Format,
            AgentError::DriverInit(_) => ErrorClass::DriverInit,
            AgentError::Timeout(_) => ErrorClass::Timeout,
            AgentError::ElementNotFound(_) => ErrorClass::ElementNotFound,
            AgentError::Render(_) => ErrorClass::Render,
            AgentError::Store(_) => ErrorClass::Store,
            AgentError::Http(e) if e.is_timeout() => ErrorClass::Timeout,
            AgentError::Browser { .. }
            | AgentError::Http(_)
            | AgentError::Io(_)
            | AgentError::Json(_) => ErrorClass::Browser,
        }
    }
}

/// Error taxonomy reported in attempt outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Malformed input, empty credentials or a link outside the portal.
    Validation,
    /// The session code does not split into two well-formed segments.
    Format,
    /// No usable browser driver could be located or launched.
    DriverInit,
    /// A page load, element wait or the attempt deadline expired.
    Timeout,
    /// The portal markup no longer contains an expected element.
    ElementNotFound,
    Render,
    Store,
    /// Any other WebDriver protocol or transport failure.
    Browser,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "ValidationError"),
            ErrorClass::Format => write!(f, "FormatError"),
            ErrorClass::DriverInit => write!(f, "DriverInitError"),
            ErrorClass::Timeout => write!(f, "TimeoutError"),
            ErrorClass::ElementNotFound => write!(f, "ElementNotFoundError"),
            ErrorClass::Render => write!(f, "RenderError"),
            ErrorClass::Store => write!(f, "StoreError"),
            ErrorClass::Browser => write!(f, "BrowserError"),
        }
    }
}
