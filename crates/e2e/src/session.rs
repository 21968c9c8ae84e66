//! Browser sessions and the factory that creates them
//!
//! A [`Session`] is one live browser plus the configuration it was started
//! with. It is owned by exactly one test and must be handed back to the
//! [`SessionFactory`] that created it when the test ends.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use taskwright_common::config::BrowserSettings;
use tracing::{debug, warn};

use crate::error::E2eResult;

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    Id(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Locator::XPath(path.into())
    }

    /// Parse a selector string: `id=...`, `css=...`, `xpath=...`, a bare
    /// XPath starting with `/` or `(`, or else a CSS selector
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        if let Some(id) = selector.strip_prefix("id=") {
            Locator::id(id)
        } else if let Some(css) = selector.strip_prefix("css=") {
            Locator::css(css)
        } else if let Some(xpath) = selector.strip_prefix("xpath=") {
            Locator::xpath(xpath)
        } else if selector.starts_with('/') || selector.starts_with('(') {
            Locator::xpath(selector)
        } else {
            Locator::css(selector)
        }
    }

    /// WebDriver location strategy and value
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Css(s) => ("css selector", s.clone()),
            Locator::Id(id) => ("css selector", format!("[id=\"{}\"]", id)),
            Locator::XPath(x) => ("xpath", x.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::Id(id) => write!(f, "id={}", id),
            Locator::XPath(x) => write!(f, "xpath={}", x),
        }
    }
}

/// Opaque reference to an element found in a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        ElementRef(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// One browser console message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub level: String,
    pub message: String,
}

impl fmt::Display for ConsoleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.timestamp).single() {
            Some(at) => write!(f, "{} {} {}", at.to_rfc3339(), self.level, self.message),
            None => write!(f, "{} {} {}", self.timestamp, self.level, self.message),
        }
    }
}

/// Browser name and version reported by the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Some(BrowserKind::Chrome),
            "firefox" => Some(BrowserKind::Firefox),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1920,
            height: 1080,
        }
    }
}

/// Baseline configuration applied to every new session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
    /// Zero by default; explicit waits are the synchronization mechanism
    pub implicit_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&BrowserSettings::default())
    }
}

impl From<&BrowserSettings> for SessionConfig {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            browser: BrowserKind::parse(&settings.kind).unwrap_or_default(),
            headless: settings.headless,
            viewport: Viewport {
                width: settings.window_width,
                height: settings.window_height,
            },
            page_load_timeout: Duration::from_millis(settings.page_load_timeout_ms),
            script_timeout: Duration::from_millis(settings.script_timeout_ms),
            implicit_wait: Duration::from_millis(settings.implicit_wait_ms),
        }
    }
}

/// Element-level browser operations.
///
/// Implemented by the WebDriver client and by test fakes. Lookups of
/// elements that are not (yet) on the page fail with a transient error so
/// the wait loop can retry them.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str) -> E2eResult<()>;
    async fn current_url(&self) -> E2eResult<String>;

    async fn find(&self, locator: &Locator) -> E2eResult<ElementRef>;
    async fn find_all(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>>;
    async fn find_in(&self, parent: &ElementRef, locator: &Locator) -> E2eResult<ElementRef>;

    async fn click(&self, element: &ElementRef) -> E2eResult<()>;
    async fn clear(&self, element: &ElementRef) -> E2eResult<()>;
    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()>;

    async fn text(&self, element: &ElementRef) -> E2eResult<String>;
    async fn is_displayed(&self, element: &ElementRef) -> E2eResult<bool>;
    async fn is_enabled(&self, element: &ElementRef) -> E2eResult<bool>;
    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool>;

    async fn console_logs(&self) -> E2eResult<Vec<ConsoleEntry>>;
    async fn screenshot(&self) -> E2eResult<Vec<u8>>;
    async fn page_source(&self) -> E2eResult<String>;

    /// End the browser session
    async fn quit(&self) -> E2eResult<()>;
}

/// A live browser owned by one test
pub struct Session {
    id: String,
    driver: Box<dyn BrowserDriver>,
    config: SessionConfig,
    browser: BrowserInfo,
    released: AtomicBool,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        driver: Box<dyn BrowserDriver>,
        config: SessionConfig,
        browser: BrowserInfo,
    ) -> Self {
        Self {
            id: id.into(),
            driver,
            config,
            browser,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn browser(&self) -> &BrowserInfo {
        &self.browser
    }

    pub fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Flag the session as released; true only for the first caller
    pub fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }
}

impl Deref for Session {
    type Target = dyn BrowserDriver;

    fn deref(&self) -> &Self::Target {
        self.driver.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("browser", &self.browser)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!("Session {} dropped without being released", self.id);
        }
    }
}

/// Creates and destroys browser sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Start a browser with the baseline configuration applied.
    ///
    /// Fails with `E2eError::SessionStart` when no browser can be started.
    async fn acquire(&self, config: &SessionConfig) -> E2eResult<Session>;

    /// Tear a session down. Safe to call more than once and never fails;
    /// errors from the browser are logged.
    async fn release(&self, session: &Session) {
        if !session.mark_released() {
            debug!("Session {} already released", session.id());
            return;
        }
        if let Err(e) = session.quit().await {
            warn!("Failed to quit session {}: {}", session.id(), e);
        }
    }
}
