//! The browser seam used by the automation controller.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AgentError;

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Form control by its `name` attribute.
    Name(String),
    Css(String),
    XPath(String),
}

impl Locator {
    /// W3C WebDriver `(using, value)` pair.
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Name(name) => ("css selector", format!("[name='{name}']")),
            Locator::Css(selector) => ("css selector", selector.clone()),
            Locator::XPath(path) => ("xpath", path.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Name(name) => write!(f, "name={name}"),
            Locator::Css(selector) => write!(f, "css={selector}"),
            Locator::XPath(path) => write!(f, "xpath={path}"),
        }
    }
}

/// Opaque reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// A live browser session owned by one automation run.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Loads `url`, failing with a timeout once `page_load` elapses.
    async fn navigate(&mut self, url: &str, page_load: Duration) -> Result<(), AgentError>;

    /// Looks the element up once. `Ok(None)` when it is not on the page.
    async fn find(&mut self, locator: &Locator) -> Result<Option<ElementRef>, AgentError>;

    /// Clears the input and types `text` into it.
    async fn fill(&mut self, element: &ElementRef, text: &str) -> Result<(), AgentError>;

    /// Clicks the element. `Ok(false)` when it is present but not yet interactable.
    async fn click(&mut self, element: &ElementRef) -> Result<bool, AgentError>;

    /// PNG bytes of the whole page.
    async fn screenshot(&mut self) -> Result<Vec<u8>, AgentError>;

    /// Ends the session and releases every resource behind it.
    async fn quit(self: Box<Self>) -> Result<(), AgentError>;
}

/// Acquires a fresh [`BrowserDriver`] per attempt.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, AgentError>;
}
