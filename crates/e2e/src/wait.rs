//! Explicit, bounded waits
//!
//! Every synchronization with the UI goes through [`WaitEngine::until`]: a
//! probe is evaluated repeatedly until it yields a value or the timeout
//! expires. Transient WebDriver errors (element missing or stale, not yet
//! interactable, click intercepted by an overlay) count as "not yet"; any
//! other error aborts the wait.
//!
//! A wait returns no later than its timeout plus one poll interval, because
//! every probe is itself bounded by the time remaining.

use std::future::Future;
use std::time::Duration;

use taskwright_common::config::WaitSettings;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{E2eError, E2eResult};
use crate::session::{BrowserDriver, ElementRef, Locator};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One wait: what is awaited, for how long, how often to look
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub description: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    cancel: Option<CancellationToken>,
}

impl WaitSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Abort the wait early when the token is cancelled
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Polls probes under a deadline
#[derive(Debug, Clone, Copy)]
pub struct WaitEngine {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for WaitEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

impl From<&WaitSettings> for WaitEngine {
    fn from(settings: &WaitSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.timeout_ms),
            Duration::from_millis(settings.poll_interval_ms),
        )
    }
}

impl WaitEngine {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same engine with a different default timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// A spec carrying this engine's defaults
    pub fn spec(&self, description: impl Into<String>) -> WaitSpec {
        WaitSpec::new(description)
            .timeout(self.timeout)
            .poll_interval(self.poll_interval)
    }

    /// Evaluate `probe` until it yields `Some(value)`.
    ///
    /// Fails with `Timeout` when the deadline passes, `WaitCancelled` when
    /// the spec's token fires, or the probe's own error when it is not
    /// transient.
    pub async fn until<T, F, Fut>(&self, spec: WaitSpec, mut probe: F) -> E2eResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<Option<T>>>,
    {
        let start = Instant::now();
        let deadline = start + spec.timeout;
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;
            let budget = deadline
                .saturating_duration_since(Instant::now())
                .max(spec.poll_interval);

            let outcome = tokio::select! {
                biased;
                _ = cancelled(&spec.cancel) => {
                    return Err(E2eError::WaitCancelled(spec.description));
                }
                outcome = timeout(budget, probe()) => outcome,
            };

            match outcome {
                Ok(Ok(Some(value))) => {
                    debug!(
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Wait satisfied: {}",
                        spec.description
                    );
                    return Ok(value);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) if e.is_transient() => {
                    trace!("Transient probe error for {}: {}", spec.description, e);
                    last_error = Some(e.to_string());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = Some(format!("probe did not answer within {:?}", budget));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(E2eError::Timeout {
                    what: spec.description,
                    waited_ms: start.elapsed().as_millis() as u64,
                    last_error,
                });
            }

            let pause = spec.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancelled(&spec.cancel) => {
                    return Err(E2eError::WaitCancelled(spec.description));
                }
                _ = sleep(pause) => {}
            }
        }
    }

    /// Wait for a boolean probe to become true
    pub async fn until_true<F, Fut>(&self, spec: WaitSpec, mut probe: F) -> E2eResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<bool>>,
    {
        self.until(spec, || {
            let check = probe();
            async move { Ok(check.await?.then_some(())) }
        })
        .await
    }

    /// Wait until the current URL equals `expected`
    pub async fn for_url(&self, driver: &dyn BrowserDriver, expected: &str) -> E2eResult<()> {
        let spec = self.spec(format!("URL to be {}", expected));
        self.until_true(spec, || async move { Ok(driver.current_url().await? == expected) })
            .await
    }

    /// Wait until the current URL contains `fragment`; returns the URL
    pub async fn for_url_containing(
        &self,
        driver: &dyn BrowserDriver,
        fragment: &str,
    ) -> E2eResult<String> {
        let spec = self.spec(format!("URL containing {}", fragment));
        self.until(spec, || async move {
            let url = driver.current_url().await?;
            Ok(url.contains(fragment).then_some(url))
        })
        .await
    }

    /// Wait until an element is in the DOM
    pub async fn for_present(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
    ) -> E2eResult<ElementRef> {
        let spec = self.spec(format!("{} to be present", locator));
        self.until(spec, || async move { driver.find(locator).await.map(Some) })
            .await
    }

    /// Wait until an element is present and displayed
    pub async fn for_visible(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
    ) -> E2eResult<ElementRef> {
        let spec = self.spec(format!("{} to be visible", locator));
        self.until(spec, || async move {
            let element = driver.find(locator).await?;
            Ok(driver.is_displayed(&element).await?.then_some(element))
        })
        .await
    }

    /// Wait until an element is absent or not displayed
    pub async fn for_hidden(&self, driver: &dyn BrowserDriver, locator: &Locator) -> E2eResult<()> {
        let spec = self.spec(format!("{} to be hidden", locator));
        self.until(spec, || async move {
            let element = match driver.find(locator).await {
                Ok(element) => element,
                Err(e) if e.is_transient() => return Ok(Some(())),
                Err(e) => return Err(e),
            };
            match driver.is_displayed(&element).await {
                Ok(displayed) => Ok((!displayed).then_some(())),
                Err(e) if e.is_transient() => Ok(Some(())),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Wait until an element is visible and enabled
    pub async fn for_enabled(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
    ) -> E2eResult<ElementRef> {
        self.for_enabled_state(driver, locator, true).await
    }

    /// Wait until an element is visible and disabled
    pub async fn for_disabled(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
    ) -> E2eResult<ElementRef> {
        self.for_enabled_state(driver, locator, false).await
    }

    async fn for_enabled_state(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
        enabled: bool,
    ) -> E2eResult<ElementRef> {
        let state = if enabled { "enabled" } else { "disabled" };
        let spec = self.spec(format!("{} to be {}", locator, state));
        self.until(spec, || async move {
            let element = driver.find(locator).await?;
            let ready = driver.is_displayed(&element).await?
                && driver.is_enabled(&element).await? == enabled;
            Ok(ready.then_some(element))
        })
        .await
    }

    /// Wait until an element's text satisfies `accept`; returns the text
    pub async fn for_text<P>(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
        what: &str,
        accept: P,
    ) -> E2eResult<String>
    where
        P: Fn(&str) -> bool,
    {
        let spec = self.spec(format!("text of {} {}", locator, what));
        let accept = &accept;
        self.until(spec, || async move {
            let element = driver.find(locator).await?;
            let text = driver.text(&element).await?;
            Ok(accept(&text).then_some(text))
        })
        .await
    }

    /// Click an element once it is visible and enabled.
    ///
    /// The click itself is part of the probe, so a click intercepted by an
    /// overlay is retried rather than failing the test.
    pub async fn click(&self, driver: &dyn BrowserDriver, locator: &Locator) -> E2eResult<()> {
        let spec = self.spec(format!("click on {}", locator));
        self.until(spec, || async move {
            let element = driver.find(locator).await?;
            click_when_ready(driver, &element).await
        })
        .await
    }

    /// Click a child of `parent` once it is visible and enabled
    pub async fn click_in(
        &self,
        driver: &dyn BrowserDriver,
        parent: &ElementRef,
        locator: &Locator,
    ) -> E2eResult<()> {
        let spec = self.spec(format!("click on {} in {}", locator, parent.id()));
        self.until(spec, || async move {
            let element = driver.find_in(parent, locator).await?;
            click_when_ready(driver, &element).await
        })
        .await
    }

    /// Type into an element once it is visible, optionally clearing it first
    pub async fn type_into(
        &self,
        driver: &dyn BrowserDriver,
        locator: &Locator,
        text: &str,
        clear_first: bool,
    ) -> E2eResult<()> {
        let element = self.for_visible(driver, locator).await?;
        if clear_first {
            driver.clear(&element).await?;
        }
        driver.send_keys(&element, text).await
    }
}

async fn click_when_ready(driver: &dyn BrowserDriver, element: &ElementRef) -> E2eResult<Option<()>> {
    if !driver.is_displayed(element).await? || !driver.is_enabled(element).await? {
        return Ok(None);
    }
    driver.click(element).await?;
    Ok(Some(()))
}

async fn cancelled(token: &Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => futures::future::pending().await,
    }
}
