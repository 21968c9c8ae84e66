//! Execution of declarative test steps

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use regex::Regex;
use taskwright_common::config::AppSettings;
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::lifecycle::{TestBody, TestContext};
use crate::pages::LoginPage;
use crate::session::{BrowserDriver, Locator};
use crate::spec::{LoginRef, TestStep, WaitState};
use crate::wait::WaitEngine;

/// Test body that signs in (optionally) and runs a list of steps
pub struct SpecBody {
    login: Option<LoginRef>,
    steps: Vec<TestStep>,
}

impl SpecBody {
    pub fn new(login: Option<LoginRef>, steps: Vec<TestStep>) -> Self {
        Self { login, steps }
    }

    async fn execute(&self, ctx: &TestContext) -> E2eResult<()> {
        let driver = ctx.session().driver();

        if let Some(login) = &self.login {
            let data = ctx.data()?;
            let username = data.get_value(&login.sheet, login.row, "Username")?;
            let password = data.get_value(&login.sheet, login.row, "Password")?;
            ctx.info(format!("Login as {} (sheet {}, row {})", username, login.sheet, login.row))?;
            LoginPage::new(driver, ctx.wait())
                .login(ctx.app(), &username, &password)
                .await?;
        }

        for (i, step) in self.steps.iter().enumerate() {
            ctx.info(format!("Step {}: {}", i + 1, step.describe()))?;
            run_step(step, driver, ctx.wait(), ctx).await?;
        }
        Ok(())
    }
}

impl TestBody for SpecBody {
    fn run<'a>(&'a self, ctx: &'a TestContext) -> BoxFuture<'a, E2eResult<()>> {
        self.execute(ctx).boxed()
    }
}

fn engine_for(wait: WaitEngine, timeout_ms: Option<u64>) -> WaitEngine {
    match timeout_ms {
        Some(ms) => wait.with_timeout(Duration::from_millis(ms)),
        None => wait,
    }
}

/// Replace `{public_home_url}`, `{application_url}` and `{task_page_url}`
pub fn expand_url(url: &str, app: &AppSettings) -> String {
    url.replace("{public_home_url}", &app.public_home_url)
        .replace("{application_url}", &app.application_url)
        .replace("{task_page_url}", &app.task_page_url)
}

async fn run_step(step: &TestStep, driver: &dyn BrowserDriver, wait: WaitEngine, ctx: &TestContext) -> E2eResult<()> {
    match step {
        TestStep::Navigate { url, wait_for_selector } => {
            let url = expand_url(url, ctx.app());
            driver.goto(&url).await?;
            if let Some(selector) = wait_for_selector {
                wait.for_visible(driver, &Locator::parse(selector)).await?;
            }
        }

        TestStep::Click { selector, timeout_ms } => {
            engine_for(wait, *timeout_ms)
                .click(driver, &Locator::parse(selector))
                .await?;
        }

        TestStep::Fill { selector, value, clear_first } => {
            wait.type_into(driver, &Locator::parse(selector), value, *clear_first)
                .await?;
        }

        TestStep::Check { selector } => set_checked(driver, wait, selector, true).await?,
        TestStep::Uncheck { selector } => set_checked(driver, wait, selector, false).await?,

        TestStep::WaitFor { selector, state, timeout_ms } => {
            let wait = engine_for(wait, *timeout_ms);
            let locator = Locator::parse(selector);
            match state {
                WaitState::Visible => wait.for_visible(driver, &locator).await.map(|_| ())?,
                WaitState::Hidden => wait.for_hidden(driver, &locator).await?,
                WaitState::Present => wait.for_present(driver, &locator).await.map(|_| ())?,
                WaitState::Enabled => wait.for_enabled(driver, &locator).await.map(|_| ())?,
                WaitState::Disabled => wait.for_disabled(driver, &locator).await.map(|_| ())?,
            }
        }

        TestStep::WaitForUrl { equals, contains, timeout_ms } => {
            let wait = engine_for(wait, *timeout_ms);
            if let Some(url) = equals {
                wait.for_url(driver, &expand_url(url, ctx.app())).await?;
            } else if let Some(part) = contains {
                wait.for_url_containing(driver, part).await?;
            }
        }

        TestStep::AssertText { selector, equals, contains, matches, timeout_ms } => {
            let expectation = TextExpectation::new(equals, contains, matches)?;
            assert_text(driver, engine_for(wait, *timeout_ms), selector, &expectation).await?;
        }

        TestStep::AssertCount { selector, count, timeout_ms } => {
            assert_count(driver, engine_for(wait, *timeout_ms), selector, *count).await?;
        }

        TestStep::Log { message } => ctx.info(message.clone())?,

        TestStep::Skip { reason } => return Err(E2eError::Skipped(reason.clone())),
    }
    Ok(())
}

async fn set_checked(driver: &dyn BrowserDriver, wait: WaitEngine, selector: &str, checked: bool) -> E2eResult<()> {
    let locator = Locator::parse(selector);
    let checkbox = wait.for_enabled(driver, &locator).await?;
    if driver.is_selected(&checkbox).await? != checked {
        wait.click(driver, &locator).await?;
    }
    Ok(())
}

enum TextExpectation {
    Equals(String),
    Contains(String),
    Matches(Regex),
}

impl TextExpectation {
    fn new(equals: &Option<String>, contains: &Option<String>, matches: &Option<String>) -> E2eResult<Self> {
        match (equals, contains, matches) {
            (Some(s), None, None) => Ok(TextExpectation::Equals(s.clone())),
            (None, Some(s), None) => Ok(TextExpectation::Contains(s.clone())),
            (None, None, Some(p)) => Regex::new(p)
                .map(TextExpectation::Matches)
                .map_err(|e| E2eError::SpecParse(e.to_string())),
            _ => Err(E2eError::SpecParse(
                "assert_text needs exactly one of equals/contains/matches".into(),
            )),
        }
    }

    fn accepts(&self, text: &str) -> bool {
        match self {
            TextExpectation::Equals(s) => text.trim() == s,
            TextExpectation::Contains(s) => text.contains(s.as_str()),
            TextExpectation::Matches(re) => re.is_match(text),
        }
    }

    fn describe(&self) -> String {
        match self {
            TextExpectation::Equals(s) => format!("to equal '{}'", s),
            TextExpectation::Contains(s) => format!("to contain '{}'", s),
            TextExpectation::Matches(re) => format!("to match /{}/", re.as_str()),
        }
    }
}

async fn assert_text(
    driver: &dyn BrowserDriver,
    wait: WaitEngine,
    selector: &str,
    expectation: &TextExpectation,
) -> E2eResult<()> {
    let locator = Locator::parse(selector);
    let last_seen = Mutex::new(None::<String>);
    let result = wait
        .for_text(driver, &locator, &expectation.describe(), |text| {
            *last_seen.lock() = Some(text.to_string());
            expectation.accepts(text)
        })
        .await;

    match result {
        Ok(text) => {
            debug!("{} text '{}' accepted", selector, text);
            Ok(())
        }
        Err(E2eError::Timeout { last_error, .. }) => Err(E2eError::AssertionFailed(match last_seen.into_inner() {
            Some(text) => format!("expected text of {} {}, was '{}'", selector, expectation.describe(), text),
            None => format!(
                "expected text of {} {}, element never found ({})",
                selector,
                expectation.describe(),
                last_error.unwrap_or_default()
            ),
        })),
        Err(e) => Err(e),
    }
}

async fn assert_count(driver: &dyn BrowserDriver, wait: WaitEngine, selector: &str, expected: usize) -> E2eResult<()> {
    let locator = Locator::parse(selector);
    let last_count = Mutex::new(0usize);
    let spec = wait.spec(format!("{} x {}", expected, locator));
    let (locator, last_count_ref) = (&locator, &last_count);
    let result = wait
        .until(spec, || async move {
            let found = driver.find_all(locator).await?.len();
            *last_count_ref.lock() = found;
            Ok((found == expected).then_some(()))
        })
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(E2eError::Timeout { .. }) => Err(E2eError::AssertionFailed(format!(
            "expected {} element(s) matching {}, found {}",
            expected,
            selector,
            last_count.into_inner()
        ))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_expand_url() {
        let app = AppSettings::default();
        assert_eq!(expand_url("{task_page_url}", &app), app.task_page_url);
        assert_eq!(expand_url("https://example.test/", &app), "https://example.test/");
    }

    #[test_case(Some("No records found"), None, None, "  No records found ", true)]
    #[test_case(Some("No records found"), None, None, "No records", false)]
    #[test_case(None, Some("records"), None, "No records found", true)]
    #[test_case(None, None, Some(r"^\d{4}-\d{2}-\d{2}$"), "2024-07-15", true)]
    #[test_case(None, None, Some(r"^\d{4}-\d{2}-\d{2}$"), "15/07/2024", false)]
    fn test_text_expectation(
        equals: Option<&str>,
        contains: Option<&str>,
        matches: Option<&str>,
        text: &str,
        accepted: bool,
    ) {
        let expectation = TextExpectation::new(
            &equals.map(String::from),
            &contains.map(String::from),
            &matches.map(String::from),
        )
        .unwrap();
        assert_eq!(expectation.accepts(text), accepted);
    }
}
