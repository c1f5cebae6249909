//! Chrome over the W3C WebDriver HTTP protocol.
//!
//! [`WebDriverLauncher`] either spawns a local `chromedriver` on a free port or
//! connects to a configured remote endpoint, then opens a headless Chrome
//! session. [`WebDriverSession`] implements [`BrowserDriver`] on top of it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};

use super::driver::{BrowserDriver, DriverLauncher, ElementRef, Locator};
use crate::config::WebDriverConfig;
use crate::error::AgentError;

// W3C identifier of an element reference in JSON payloads.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735e35f0f4";

const CHROMEDRIVER_EXE: &str = if cfg!(windows) {
    "chromedriver.exe"
} else {
    "chromedriver"
};

const WELL_KNOWN_PATHS: &[&str] = &[
    "/opt/homebrew/bin/chromedriver",
    "/usr/local/bin/chromedriver",
    "/usr/bin/chromedriver",
    "/usr/lib/chromium/chromedriver",
    "/usr/lib/chromium-browser/chromedriver",
];

const REMEDIATION: &str = "Install a chromedriver matching your Chrome version \
(macOS: `brew install --cask chromedriver` then `xattr -d com.apple.quarantine $(which chromedriver)`; \
Debian/Ubuntu: `apt install chromium-driver`), point `webdriver.binary` or the CHROMEDRIVER \
environment variable at the executable, or set `webdriver.url` / WEBDRIVER_URL to a running \
WebDriver server.";

fn driver_init_error(reason: impl std::fmt::Display) -> AgentError {
    AgentError::DriverInit(format!(
        "WebDriver initialization failed on {} architecture: {reason}\n\n{REMEDIATION}",
        std::env::consts::ARCH
    ))
}

/// Finds a chromedriver executable: the configured path, then `PATH`, then
/// well-known install locations.
pub fn locate_chromedriver(
    configured: Option<&Path>,
    path_var: Option<OsString>,
) -> Result<PathBuf, AgentError> {
    if let Some(path) = configured {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(driver_init_error(format!(
                "configured chromedriver not found at {}",
                path.display()
            )))
        };
    }

    let on_path = path_var
        .iter()
        .flat_map(|paths| std::env::split_paths(paths))
        .map(|dir| dir.join(CHROMEDRIVER_EXE))
        .find(|candidate| candidate.is_file());
    if let Some(found) = on_path {
        return Ok(found);
    }

    WELL_KNOWN_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| driver_init_error("no chromedriver executable found"))
}

fn free_local_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Unwraps the `value` member of a WebDriver response, turning error payloads
/// into [`AgentError::Browser`].
async fn decode(response: reqwest::Response) -> Result<Value, AgentError> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }

    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let error = field("error");
    Err(AgentError::Browser {
        error: if error.is_empty() {
            format!("http {}", status.as_u16())
        } else {
            error
        },
        message: field("message"),
    })
}

fn is_browser_error(err: &AgentError, codes: &[&str]) -> bool {
    matches!(err, AgentError::Browser { error, .. } if codes.contains(&error.as_str()))
}

/// Launches one WebDriver session per call.
pub struct WebDriverLauncher {
    config: WebDriverConfig,
    client: Client,
}

impl WebDriverLauncher {
    pub fn new(config: &WebDriverConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            config: config.clone(),
            client,
        }
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--window-size=1920,1080",
            "--disable-blink-features=AutomationControlled",
        ];
        if self.config.headless {
            args.insert(0, "--headless=new");
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "profile.managed_default_content_settings.images": 2,
                            "profile.default_content_setting_values.notifications": 2
                        },
                        "excludeSwitches": ["enable-logging", "enable-automation"]
                    }
                }
            }
        })
    }

    async fn spawn_local(&self) -> Result<(String, Child), AgentError> {
        let binary = locate_chromedriver(
            self.config.binary.as_deref(),
            std::env::var_os("PATH"),
        )?;
        let port = free_local_port().map_err(driver_init_error)?;

        tracing::info!(binary = %binary.display(), port, "starting chromedriver");
        let mut child = Command::new(&binary)
            .arg(format!("--port={port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| driver_init_error(format!("could not start {}: {e}", binary.display())))?;

        let base_url = format!("http://127.0.0.1:{port}");
        if let Err(e) = self.wait_until_ready(&base_url, &mut child).await {
            let _ = child.kill().await;
            return Err(e);
        }
        Ok((base_url, child))
    }

    async fn wait_until_ready(&self, base_url: &str, child: &mut Child) -> Result<(), AgentError> {
        let deadline = Instant::now() + self.config.startup_timeout();
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(driver_init_error(format!("chromedriver exited early ({status})")));
            }

            let ready = match self.client.get(format!("{base_url}/status")).send().await {
                Ok(response) => decode(response)
                    .await
                    .ok()
                    .and_then(|value| value.get("ready").and_then(Value::as_bool))
                    .unwrap_or(false),
                Err(_) => false,
            };
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(driver_init_error(format!(
                    "chromedriver did not become ready within {}s",
                    self.config.startup_timeout_secs
                )));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn new_session(&self, base_url: &str) -> Result<String, AgentError> {
        let response = self
            .client
            .post(format!("{base_url}/session"))
            .json(&self.capabilities())
            .send()
            .await?;
        let value = decode(response).await?;
        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::Browser {
                error: "invalid session".into(),
                message: "new session response carried no sessionId".into(),
            })
    }
}

#[async_trait]
impl DriverLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, AgentError> {
        let (base_url, mut child) = match &self.config.url {
            Some(url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let (base_url, child) = self.spawn_local().await?;
                (base_url, Some(child))
            }
        };

        match self.new_session(&base_url).await {
            Ok(session_id) => {
                tracing::info!(%session_id, "WebDriver session started");
                Ok(Box::new(WebDriverSession {
                    client: self.client.clone(),
                    base_url,
                    session_id,
                    child,
                }))
            }
            Err(e) => {
                if let Some(child) = child.as_mut() {
                    let _ = child.kill().await;
                }
                Err(driver_init_error(format!("could not create a browser session: {e}")))
            }
        }
    }
}

/// One Chrome session behind a WebDriver endpoint.
pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
    // Locally spawned chromedriver, killed on quit.
    child: Option<Child>,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Value) -> Result<Value, AgentError> {
        let url = format!("{}/session/{}{path}", self.base_url, self.session_id);
        let request = self.client.request(method.clone(), url);
        let request = if method == Method::POST {
            request.json(&body)
        } else {
            request
        };
        decode(request.send().await?).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, AgentError> {
        self.command(Method::POST, path, body).await
    }

    async fn get(&self, path: &str) -> Result<Value, AgentError> {
        self.command(Method::GET, path, Value::Null).await
    }

    async fn full_page_png(&self) -> Result<String, AgentError> {
        let value = self
            .post(
                "/goog/cdp/execute",
                json!({
                    "cmd": "Page.captureScreenshot",
                    "params": { "format": "png", "captureBeyondViewport": true }
                }),
            )
            .await?;
        value
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::Browser {
                error: "unknown error".into(),
                message: "Page.captureScreenshot returned no data".into(),
            })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str, page_load: Duration) -> Result<(), AgentError> {
        let ms = page_load.as_millis() as u64;
        self.post("/timeouts", json!({ "pageLoad": ms })).await?;

        // The driver enforces pageLoad; the outer bound covers a stalled driver.
        let grace = page_load + Duration::from_secs(5);
        let navigation = timeout(grace, self.post("/url", json!({ "url": url })));
        match navigation.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if is_browser_error(&e, &["timeout"]) => Err(AgentError::Timeout(format!(
                "Page load timeout after {}s - please check your internet connection",
                page_load.as_secs()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::Timeout(format!(
                "Page load did not finish within {}s",
                grace.as_secs()
            ))),
        }
    }

    async fn find(&mut self, locator: &Locator) -> Result<Option<ElementRef>, AgentError> {
        let (using, value) = locator.strategy();
        match self.post("/element", json!({ "using": using, "value": value })).await {
            Ok(element) => element
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| Some(ElementRef(id.to_string())))
                .ok_or_else(|| AgentError::Browser {
                    error: "unknown error".into(),
                    message: format!("element response for {locator} carried no reference"),
                }),
            Err(e) if is_browser_error(&e, &["no such element"]) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fill(&mut self, element: &ElementRef, text: &str) -> Result<(), AgentError> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .await?;
        self.post(&format!("/element/{}/value", element.0), json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementRef) -> Result<bool, AgentError> {
        match self.post(&format!("/element/{}/click", element.0), json!({})).await {
            Ok(_) => Ok(true),
            Err(e)
                if is_browser_error(
                    &e,
                    &["element not interactable", "element click intercepted"],
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, AgentError> {
        let encoded = match self.full_page_png().await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "full-page capture unavailable, using viewport screenshot");
                self.get("/screenshot")
                    .await?
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AgentError::Browser {
                        error: "unknown error".into(),
                        message: "screenshot response was not a string".into(),
                    })?
            }
        };
        BASE64.decode(encoded.as_bytes()).map_err(|e| AgentError::Browser {
            error: "unknown error".into(),
            message: format!("screenshot was not valid base64: {e}"),
        })
    }

    async fn quit(self: Box<Self>) -> Result<(), AgentError> {
        let mut session = self;
        let deleted = session.command(Method::DELETE, "", Value::Null).await;
        if let Some(mut child) = session.child.take() {
            let _ = child.kill().await;
        }
        tracing::info!(session_id = %session.session_id, "WebDriver closed");
        deleted.map(|_| ())
    }
}
