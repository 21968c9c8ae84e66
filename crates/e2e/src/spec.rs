//! Declarative YAML test specification

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::fixture::TaskFixture;
use crate::lifecycle::TestCase;
use crate::session::Viewport;
use crate::steps::SpecBody;

/// A complete test specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Browser window size; the configured default when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Title prefix owning this test's fixtures
    #[serde(default)]
    pub fixture_prefix: Option<String>,

    /// Task rows inserted before the steps run
    #[serde(default)]
    pub fixtures: Vec<TaskFixture>,

    /// Sign in with a row of the credentials sheet before the steps
    #[serde(default)]
    pub login: Option<LoginRef>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRef {
    #[serde(default = "default_login_sheet")]
    pub sheet: String,
    #[serde(default = "default_login_row")]
    pub row: usize,
}

fn default_login_sheet() -> String {
    "LoginCredentials".to_string()
}

fn default_login_row() -> usize {
    1
}

/// A single step in a test
///
/// Selectors are CSS by default; `id=`, `xpath=` (or a leading `/`) and
/// `css=` pick the strategy explicitly. Every element step waits for its
/// element before acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL; `{task_page_url}` style placeholders name the
    /// configured application URLs
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Click an element once it is visible and enabled
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        clear_first: bool,
    },

    /// Check a checkbox
    Check { selector: String },

    /// Uncheck a checkbox
    Uncheck { selector: String },

    /// Wait for an element to reach a state
    WaitFor {
        selector: String,
        #[serde(default)]
        state: WaitState,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for the browser URL
    WaitForUrl {
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert an element's text, waiting for it to settle
    AssertText {
        selector: String,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        matches: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert how many elements match, waiting for it to settle
    AssertCount {
        selector: String,
        count: usize,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Log a message to the report
    Log { message: String },

    /// Stop here and mark the test skipped
    Skip { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Present,
    Enabled,
    Disabled,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Present => "present",
            WaitState::Enabled => "enabled",
            WaitState::Disabled => "disabled",
        }
    }
}

impl TestStep {
    /// One-line description for the report
    pub fn describe(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate to {}", url),
            TestStep::Click { selector, .. } => format!("click {}", selector),
            TestStep::Fill { selector, value, .. } => format!("fill {} with '{}'", selector, value),
            TestStep::Check { selector } => format!("check {}", selector),
            TestStep::Uncheck { selector } => format!("uncheck {}", selector),
            TestStep::WaitFor { selector, state, .. } => format!("wait for {} to be {}", selector, state.as_str()),
            TestStep::WaitForUrl { equals, contains, .. } => match (equals, contains) {
                (Some(url), _) => format!("wait for URL {}", url),
                (None, Some(part)) => format!("wait for URL containing {}", part),
                (None, None) => "wait for URL".to_string(),
            },
            TestStep::AssertText { selector, .. } => format!("assert text of {}", selector),
            TestStep::AssertCount { selector, count, .. } => format!("assert {} x {}", count, selector),
            TestStep::Log { message } => format!("log: {}", message),
            TestStep::Skip { reason } => format!("skip: {}", reason),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            TestStep::WaitForUrl { equals, contains, .. } => match (equals, contains) {
                (Some(_), None) | (None, Some(_)) => Ok(()),
                _ => Err("wait_for_url needs exactly one of equals/contains".into()),
            },
            TestStep::AssertText { equals, contains, matches, .. } => {
                let given = [equals.is_some(), contains.is_some(), matches.is_some()]
                    .iter()
                    .filter(|x| **x)
                    .count();
                if given != 1 {
                    return Err("assert_text needs exactly one of equals/contains/matches".into());
                }
                if let Some(pattern) = matches {
                    Regex::new(pattern).map_err(|e| format!("bad pattern '{}': {}", pattern, e))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test specs from a directory, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        let fail = |msg: String| Err(E2eError::SpecParse(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("test name must not be empty".into()));
        }
        if !self.fixtures.is_empty() {
            let Some(prefix) = self.fixture_prefix.as_deref().filter(|p| !p.is_empty()) else {
                return fail("fixtures require a non-empty fixture_prefix".into());
            };
            if let Some(stray) = self.fixtures.iter().find(|f| !f.owned_by(prefix)) {
                return fail(format!("fixture '{}' does not start with '{}'", stray.title, prefix));
            }
        }
        for (i, step) in self.steps.iter().enumerate() {
            if let Err(msg) = step.validate() {
                return fail(format!("step {}: {}", i + 1, msg));
            }
        }
        Ok(())
    }

    /// Turn the spec into a runnable test case
    pub fn into_case(self) -> TestCase {
        let mut case = TestCase::new(self.name, SpecBody::new(self.login, self.steps)).with_tags(self.tags);
        if let Some(viewport) = self.viewport {
            case = case.with_viewport(viewport);
        }
        if let Some(prefix) = self.fixture_prefix {
            case = case.with_fixtures(prefix, self.fixtures);
        }
        case
    }
}
