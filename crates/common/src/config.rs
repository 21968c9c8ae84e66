//! Harness configuration
//!
//! Configuration is read once per process through [`ConfigLoader`] and then
//! passed by value into the session factory, fixture store and report sink.

use crate::{Error, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "TASKWRIGHT_";

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Browser and driver settings
    pub browser: BrowserSettings,

    /// URLs of the application under test
    pub app: AppSettings,

    /// Backing store location
    pub store: StoreSettings,

    /// Explicit wait defaults
    pub wait: WaitSettings,

    /// Report output
    pub report: ReportSettings,

    /// Parallelism and per-test limits
    pub runner: RunnerSettings,

    /// Fixture data sheet
    pub data: DataSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Browser family: "chrome" or "firefox"
    pub kind: String,

    /// Path to the chromedriver/geckodriver binary
    pub driver_path: PathBuf,

    /// URL of an already running driver; when set no driver is spawned
    pub driver_url: Option<String>,

    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub page_load_timeout_ms: u64,
    pub script_timeout_ms: u64,

    /// Implicit element lookup wait applied to every session.
    /// Zero keeps explicit waits as the only synchronization.
    pub implicit_wait_ms: u64,

    pub driver_startup_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kind: "chrome".to_string(),
            driver_path: PathBuf::from("chromedriver"),
            driver_url: None,
            headless: true,
            window_width: 1920,
            window_height: 1080,
            page_load_timeout_ms: 30_000,
            script_timeout_ms: 30_000,
            implicit_wait_ms: 0,
            driver_startup_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub public_home_url: String,
    pub application_url: String,
    pub task_page_url: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            public_home_url: "http://localhost:4200/#/public/home".to_string(),
            application_url: "http://localhost:4200/#/app".to_string(),
            task_page_url: "http://localhost:4200/#/app/task".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite file holding the application's task table
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskmanager.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub output_dir: PathBuf,
    pub report_name: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("test-output"),
            report_name: "TaskwrightReport".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub workers: usize,
    pub test_timeout_ms: Option<u64>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            test_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub sheet_path: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            sheet_path: PathBuf::from("testdata/login_credentials.yaml"),
        }
    }
}

impl HarnessConfig {
    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Apply `TASKWRIGHT_*` overrides from an environment lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("BROWSER") {
            self.browser.kind = v;
        }
        if let Some(v) = var("DRIVER_PATH") {
            self.browser.driver_path = PathBuf::from(v);
        }
        if let Some(v) = var("DRIVER_URL") {
            self.browser.driver_url = Some(v);
        }
        if let Some(v) = var("HEADLESS") {
            self.browser.headless = parse_flag("HEADLESS", &v)?;
        }
        if let Some(v) = var("PUBLIC_HOME_URL") {
            self.app.public_home_url = v;
        }
        if let Some(v) = var("APPLICATION_URL") {
            self.app.application_url = v;
        }
        if let Some(v) = var("TASK_PAGE_URL") {
            self.app.task_page_url = v;
        }
        if let Some(v) = var("STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = var("OUTPUT_DIR") {
            self.report.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("WORKERS") {
            self.runner.workers = v
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("WORKERS must be a number, got '{}'", v)))?;
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.wait.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("wait.poll_interval_ms must be positive".into()));
        }
        if self.runner.workers == 0 {
            return Err(Error::InvalidConfig("runner.workers must be at least 1".into()));
        }
        match self.browser.kind.as_str() {
            "chrome" | "firefox" => Ok(()),
            other => Err(Error::InvalidConfig(format!("unsupported browser '{}'", other))),
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{} must be a boolean, got '{}'", name, value))),
    }
}

/// Reads the configuration once and serves the cached value afterwards
pub struct ConfigLoader {
    path: PathBuf,
    cell: OnceCell<HarnessConfig>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Load on first call (file plus environment), cached afterwards
    pub fn get(&self) -> Result<&HarnessConfig> {
        self.cell.get_or_try_init(|| {
            debug!("Loading configuration from {}", self.path.display());
            let mut config = HarnessConfig::from_file(&self.path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
