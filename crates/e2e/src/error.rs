//! Error types for the test harness

use thiserror::Error;

/// WebDriver error codes that mean "the UI has not caught up yet"
const TRANSIENT_CODES: &[&str] = &[
    "no such element",
    "stale element reference",
    "element not interactable",
    "element click intercepted",
];

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Browser session failed to start: {0}")]
    SessionStart(String),

    #[error("Browser driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Browser driver health check failed after {0} attempts")]
    DriverHealthCheck(usize),

    #[error("WebDriver error [{code}]: {message}")]
    WebDriver { code: String, message: String },

    #[error("Timed out after {waited_ms} ms waiting for {what}")]
    Timeout {
        what: String,
        waited_ms: u64,
        last_error: Option<String>,
    },

    #[error("Wait for {0} was cancelled")]
    WaitCancelled(String),

    #[error("Fixture provisioning failed for '{title}': {reason}")]
    FixtureProvision { title: String, reason: String },

    #[error("Fixture cleanup for prefix '{prefix}' failed: {reason}")]
    FixtureCleanup { prefix: String, reason: String },

    #[error("No active report entry for {0}")]
    NoActiveEntry(String),

    #[error("Diagnostics capture of {artifact} failed: {reason}")]
    DiagnosticsCapture { artifact: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Skipped: {0}")]
    Skipped(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Data sheet error: {0}")]
    DataSheet(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Store error: {0}")]
    Store(#[from] taskwright_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl E2eError {
    pub fn webdriver(code: impl Into<String>, message: impl Into<String>) -> Self {
        E2eError::WebDriver {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether a failed UI probe should be retried by the wait loop
    pub fn is_transient(&self) -> bool {
        match self {
            E2eError::WebDriver { code, .. } => TRANSIENT_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, E2eError::Skipped(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
