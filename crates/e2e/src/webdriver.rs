//! W3C WebDriver client
//!
//! Speaks the WebDriver HTTP protocol to chromedriver or geckodriver and
//! exposes each remote session as a [`BrowserDriver`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::session::{
    BrowserDriver, BrowserInfo, BrowserKind, ConsoleEntry, ElementRef, Locator, Session,
    SessionConfig, SessionFactory,
};

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// HTTP transport to a WebDriver endpoint
#[derive(Clone, Debug)]
pub struct WebDriverClient {
    base_url: String,
    http: reqwest::Client,
}

impl WebDriverClient {
    pub fn new(base_url: impl Into<String>) -> E2eResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a command and unwrap the `value` member of the response
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> E2eResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if let Some(code) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            debug!("{} {} -> {}: {}", method, path, code, message);
            return Err(E2eError::webdriver(code, message));
        }
        if !status.is_success() {
            return Err(E2eError::webdriver(
                "unknown error",
                format!("{} {} returned HTTP {}", method, path, status),
            ));
        }

        Ok(value)
    }

    /// Whether the driver reports itself ready for new sessions
    pub async fn is_ready(&self) -> E2eResult<bool> {
        let value = self.send(Method::GET, "/status", None).await?;
        Ok(value.get("ready").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Create a remote session; returns its id and the matched capabilities
    pub async fn new_session(&self, capabilities: Value) -> E2eResult<(String, Value)> {
        let value = self.send(Method::POST, "/session", Some(capabilities)).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| E2eError::webdriver("invalid response", "no sessionId in new session response"))?
            .to_string();
        let caps = value.get("capabilities").cloned().unwrap_or(Value::Null);
        Ok((id, caps))
    }
}

/// Capabilities request for a new session
pub fn capabilities(config: &SessionConfig) -> Value {
    let size = format!("--window-size={},{}", config.viewport.width, config.viewport.height);
    match config.browser {
        BrowserKind::Chrome => {
            let mut args = vec![size, "--disable-dev-shm-usage".to_string()];
            if config.headless {
                args.push("--headless=new".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "goog:chromeOptions": { "args": args },
                        "goog:loggingPrefs": { "browser": "ALL" }
                    }
                }
            })
        }
        BrowserKind::Firefox => {
            let args: Vec<&str> = if config.headless { vec!["-headless"] } else { vec![] };
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "moz:firefoxOptions": { "args": args }
                    }
                }
            })
        }
    }
}

/// One remote browser session
pub struct WebDriverSession {
    client: WebDriverClient,
    id: String,
}

impl WebDriverSession {
    fn path(&self, suffix: &str) -> String {
        format!("/session/{}{}", self.id, suffix)
    }

    fn element_path(&self, element: &ElementRef, suffix: &str) -> String {
        format!("/session/{}/element/{}{}", self.id, element.id(), suffix)
    }

    async fn get(&self, suffix: &str) -> E2eResult<Value> {
        self.client.send(Method::GET, &self.path(suffix), None).await
    }

    async fn post(&self, suffix: &str, body: Value) -> E2eResult<Value> {
        self.client.send(Method::POST, &self.path(suffix), Some(body)).await
    }

    /// Apply timeouts and window size
    async fn configure(&self, config: &SessionConfig) -> E2eResult<()> {
        self.post(
            "/timeouts",
            json!({
                "implicit": config.implicit_wait.as_millis() as u64,
                "pageLoad": config.page_load_timeout.as_millis() as u64,
                "script": config.script_timeout.as_millis() as u64,
            }),
        )
        .await?;
        self.post(
            "/window/rect",
            json!({ "width": config.viewport.width, "height": config.viewport.height }),
        )
        .await?;
        Ok(())
    }

    async fn element_flag(&self, element: &ElementRef, property: &str) -> E2eResult<bool> {
        let value = self
            .client
            .send(Method::GET, &self.element_path(element, property), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

fn element_from(value: &Value) -> E2eResult<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementRef::new)
        .ok_or_else(|| E2eError::webdriver("invalid response", format!("not an element: {}", value)))
}

fn locator_body(locator: &Locator) -> Value {
    let (using, value) = locator.strategy();
    json!({ "using": using, "value": value })
}

fn string_from(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(string_from(self.get("/url").await?))
    }

    async fn find(&self, locator: &Locator) -> E2eResult<ElementRef> {
        let value = self.post("/element", locator_body(locator)).await?;
        element_from(&value)
    }

    async fn find_all(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>> {
        let value = self.post("/elements", locator_body(locator)).await?;
        match value {
            Value::Array(items) => items.iter().map(element_from).collect(),
            other => Err(E2eError::webdriver("invalid response", format!("expected a list, got {}", other))),
        }
    }

    async fn find_in(&self, parent: &ElementRef, locator: &Locator) -> E2eResult<ElementRef> {
        let value = self
            .client
            .send(
                Method::POST,
                &self.element_path(parent, "/element"),
                Some(locator_body(locator)),
            )
            .await?;
        element_from(&value)
    }

    async fn click(&self, element: &ElementRef) -> E2eResult<()> {
        self.client
            .send(Method::POST, &self.element_path(element, "/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> E2eResult<()> {
        self.client
            .send(Method::POST, &self.element_path(element, "/clear"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()> {
        self.client
            .send(
                Method::POST,
                &self.element_path(element, "/value"),
                Some(json!({ "text": text })),
            )
            .await?;
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> E2eResult<String> {
        let value = self
            .client
            .send(Method::GET, &self.element_path(element, "/text"), None)
            .await?;
        Ok(string_from(value))
    }

    async fn is_displayed(&self, element: &ElementRef) -> E2eResult<bool> {
        self.element_flag(element, "/displayed").await
    }

    async fn is_enabled(&self, element: &ElementRef) -> E2eResult<bool> {
        self.element_flag(element, "/enabled").await
    }

    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool> {
        self.element_flag(element, "/selected").await
    }

    async fn console_logs(&self) -> E2eResult<Vec<ConsoleEntry>> {
        // Chromium's legacy log endpoint; other drivers answer "unknown command"
        let value = self.post("/se/log", json!({ "type": "browser" })).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        let encoded = string_from(self.get("/screenshot").await?);
        Ok(STANDARD.decode(encoded.as_bytes())?)
    }

    async fn page_source(&self) -> E2eResult<String> {
        Ok(string_from(self.get("/source").await?))
    }

    async fn quit(&self) -> E2eResult<()> {
        self.client.send(Method::DELETE, &self.path(""), None).await?;
        Ok(())
    }
}

/// Session factory backed by a WebDriver endpoint
pub struct WebDriverFactory {
    client: WebDriverClient,
}

impl WebDriverFactory {
    pub fn new(driver_url: impl Into<String>) -> E2eResult<Self> {
        Ok(Self {
            client: WebDriverClient::new(driver_url)?,
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn acquire(&self, config: &SessionConfig) -> E2eResult<Session> {
        let (id, caps) = self
            .client
            .new_session(capabilities(config))
            .await
            .map_err(|e| E2eError::SessionStart(format!("{} at {}", e, self.client.base_url())))?;

        let remote = WebDriverSession {
            client: self.client.clone(),
            id: id.clone(),
        };
        if let Err(e) = remote.configure(config).await {
            let _ = remote.quit().await;
            return Err(E2eError::SessionStart(format!("configuring session {}: {}", id, e)));
        }

        let browser = BrowserInfo {
            name: caps
                .get("browserName")
                .and_then(Value::as_str)
                .unwrap_or(config.browser.as_str())
                .to_string(),
            version: caps
                .get("browserVersion")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        };
        info!("Started {} {} session {}", browser.name, browser.version, id);

        Ok(Session::new(id, Box::new(remote), config.clone(), browser))
    }
}
