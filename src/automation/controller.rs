use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::{Instant, sleep, timeout};

use super::driver::{BrowserDriver, DriverLauncher, ElementRef, Locator};
use super::state::{Run, State, StateMachine, StepOutcome};
use crate::artifacts;
use crate::attempt::Credentials;
use crate::config::{AgentConfig, PortalSelectors};
use crate::error::{AgentError, ErrorClass};

/// Structured result of one automation run. Always returned, never thrown.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationOutcome {
    pub success: bool,
    pub message: String,
    pub error_class: Option<ErrorClass>,
    pub screenshot_path: Option<PathBuf>,
    pub states: Vec<State>,
    pub finished_at: DateTime<Local>,
}

impl AutomationOutcome {
    fn captured(run: &Run, screenshot: PathBuf) -> Self {
        Self {
            success: true,
            message: "Attendance marked successfully".to_string(),
            error_class: None,
            screenshot_path: Some(screenshot),
            states: run.transitions(),
            finished_at: Local::now(),
        }
    }

    fn failed(states: Vec<State>, error: &AgentError, screenshot: Option<PathBuf>) -> Self {
        let class = error.class();
        Self {
            success: false,
            message: format!("{class}: {error}"),
            error_class: Some(class),
            screenshot_path: screenshot,
            states,
            finished_at: Local::now(),
        }
    }
}

/// Marks attendance for a converted link. The seam Phase 2 runs against.
#[async_trait]
pub trait AttendanceAutomation: Send + Sync {
    async fn mark_attendance(&self, link: &str, credentials: &Credentials) -> AutomationOutcome;
}

/// Timing and portal markup used by [`AutomationController`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub page_load: Duration,
    pub element_wait: Duration,
    pub poll_interval: Duration,
    pub attempt_deadline: Duration,
    pub screenshot_dir: PathBuf,
    pub selectors: PortalSelectors,
}

impl ControllerSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            page_load: config.webdriver.page_load_timeout(),
            element_wait: config.webdriver.element_wait(),
            poll_interval: config.webdriver.poll_interval(),
            attempt_deadline: config.webdriver.attempt_deadline(),
            screenshot_dir: config.screenshot_dir.clone(),
            selectors: config.portal.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Present,
    Clicked,
}

/// Drives one browser session through login, confirmation and capture.
pub struct AutomationController {
    launcher: Arc<dyn DriverLauncher>,
    settings: ControllerSettings,
}

impl AutomationController {
    pub fn new(launcher: Arc<dyn DriverLauncher>, settings: ControllerSettings) -> Self {
        Self { launcher, settings }
    }

    /// Runs the whole state machine for one attempt.
    ///
    /// The driver is released exactly once on every path after a successful
    /// launch, including expiry of the overall deadline.
    pub async fn run(&self, link: &str, credentials: &Credentials) -> AutomationOutcome {
        if let Err(e) = credentials.validate() {
            tracing::warn!(error = %e, "rejected attempt before driver launch");
            return AutomationOutcome::failed(Vec::new(), &e, None);
        }

        let mut run = Run::new();
        tracing::info!(%link, username = %credentials.username, "starting attendance marking");

        let mut driver = match self.launcher.launch().await {
            Ok(driver) => driver,
            Err(e) => {
                StateMachine::next(&mut run, StepOutcome::Failure(e.class()));
                tracing::error!(error = %e, "failed to initialize WebDriver");
                return AutomationOutcome::failed(run.transitions(), &e, None);
            }
        };
        StateMachine::next(&mut run, StepOutcome::Success);

        let deadline = self.settings.attempt_deadline;
        let result = match timeout(deadline, self.drive(driver.as_mut(), &mut run, link, credentials)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(format!(
                "Attempt exceeded its overall deadline of {}s",
                deadline.as_secs()
            ))),
        };

        let outcome = match result {
            Ok(screenshot) => {
                tracing::info!(screenshot = %screenshot.display(), "attendance marked successfully");
                AutomationOutcome::captured(&run, screenshot)
            }
            Err(e) => {
                let from = run.state;
                StateMachine::next(&mut run, StepOutcome::Failure(e.class()));
                tracing::error!(state = %from, error = %e, "attendance marking failed");
                let diagnostic = self.capture_diagnostic(driver.as_mut()).await;
                AutomationOutcome::failed(run.transitions(), &e, diagnostic)
            }
        };

        if let Err(e) = driver.quit().await {
            tracing::warn!(error = %e, "WebDriver did not shut down cleanly");
        }
        outcome
    }

    async fn drive(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut Run,
        link: &str,
        credentials: &Credentials,
    ) -> Result<PathBuf, AgentError> {
        let portal = &self.settings.selectors;

        tracing::info!("Step 1: navigating to QR URL");
        driver.navigate(link, self.settings.page_load).await?;
        StateMachine::next(run, StepOutcome::Success);

        tracing::info!("Step 2: logging in");
        let user_field = Locator::Name(portal.username_field.clone());
        let username = self.wait_for(driver, &user_field, Wait::Present).await?;
        driver
            .fill(&username, &credentials.username)
            .await
            .map_err(|e| vanished(e, &user_field))?;
        let pass_field = Locator::Name(portal.password_field.clone());
        let password = self.require(driver, &pass_field).await?;
        driver
            .fill(&password, &credentials.password)
            .await
            .map_err(|e| vanished(e, &pass_field))?;
        let submit = Locator::Css(portal.submit_button.clone());
        let button = self.require(driver, &submit).await?;
        let clicked = driver
            .click(&button)
            .await
            .map_err(|e| vanished(e, &submit))?;
        if !clicked {
            return Err(AgentError::ElementNotFound(format!(
                "Login button {submit} is not clickable - website structure may have changed"
            )));
        }
        StateMachine::next(run, StepOutcome::Success);

        tracing::info!("Step 3: confirming attendance");
        self.wait_for(driver, &Locator::Css(portal.proceed_button.clone()), Wait::Clicked)
            .await?;
        StateMachine::next(run, StepOutcome::Success);

        tracing::info!("Step 4: waiting for confirmation page");
        self.wait_for(driver, &Locator::XPath(portal.confirmation_marker.clone()), Wait::Present)
            .await?;
        let screenshot = self.save_screenshot(driver, "confirmation").await?;
        StateMachine::next(run, StepOutcome::Success);

        Ok(screenshot)
    }

    /// Polls for `locator` until it is present (and clicked, for
    /// [`Wait::Clicked`]) or the element wait expires.
    async fn wait_for(
        &self,
        driver: &mut dyn BrowserDriver,
        locator: &Locator,
        wait: Wait,
    ) -> Result<ElementRef, AgentError> {
        let deadline = Instant::now() + self.settings.element_wait;
        loop {
            if let Some(element) = driver.find(locator).await? {
                if wait == Wait::Present {
                    return Ok(element);
                }
                match driver.click(&element).await {
                    Ok(true) => return Ok(element),
                    Ok(false) => {}
                    // Re-rendered between lookup and click; look it up again.
                    Err(e) if is_vanished(&e) => {
                        tracing::debug!(%locator, error = %e, "element went stale, retrying");
                    }
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return Err(AgentError::Timeout(format!(
                    "Timed out after {}s waiting for {locator} - the portal may be unreachable or its markup may have changed",
                    self.settings.element_wait.as_secs_f32()
                )));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Single lookup for an element that must already be on the page.
    async fn require(
        &self,
        driver: &mut dyn BrowserDriver,
        locator: &Locator,
    ) -> Result<ElementRef, AgentError> {
        driver.find(locator).await?.ok_or_else(|| {
            AgentError::ElementNotFound(format!(
                "Required element {locator} not found on page - website structure may have changed"
            ))
        })
    }

    async fn save_screenshot(
        &self,
        driver: &mut dyn BrowserDriver,
        prefix: &str,
    ) -> Result<PathBuf, AgentError> {
        let png = driver.screenshot().await?;
        let (path, mut file) = artifacts::claim_png(&self.settings.screenshot_dir, prefix, Local::now())?;
        if let Err(e) = file.write_all(&png) {
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        tracing::info!(path = %path.display(), "screenshot captured");
        Ok(path)
    }

    // Best effort: a failing capture is logged and never replaces the original error.
    async fn capture_diagnostic(&self, driver: &mut dyn BrowserDriver) -> Option<PathBuf> {
        match timeout(self.settings.element_wait, self.save_screenshot(driver, "error")).await {
            Ok(Ok(path)) => Some(path),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "could not capture error screenshot");
                None
            }
            Err(_) => {
                tracing::warn!("error screenshot timed out");
                None
            }
        }
    }
}

// WebDriver error codes for an element that left the page after it was found.
const VANISHED: &[&str] = &["stale element reference", "no such element", "detached shadow root"];

fn is_vanished(err: &AgentError) -> bool {
    matches!(err, AgentError::Browser { error, .. } if VANISHED.contains(&error.as_str()))
}

/// Reports an element that disappeared mid-step as missing from the portal.
fn vanished(err: AgentError, locator: &Locator) -> AgentError {
    if is_vanished(&err) {
        AgentError::ElementNotFound(format!(
            "Element {locator} disappeared from the page - website structure may have changed"
        ))
    } else {
        err
    }
}

#[async_trait]
impl AttendanceAutomation for AutomationController {
    async fn mark_attendance(&self, link: &str, credentials: &Credentials) -> AutomationOutcome {
        self.run(link, credentials).await
    }
}
