//! Per-test lifecycle
//!
//! Every test runs the same state machine exactly once:
//!
//! ```text
//! Idle -> SessionReady -> FixturesReady -> Running -> Passed|Failed|Skipped -> Cleaned -> Reported
//!   \                \                                                           ^
//!    \                `-- fixture failure --> Failed ----------------------------'
//!     `-- session failure ------------------------------------------------------> Reported
//! ```
//!
//! Failure diagnostics are captured on the way from `Failed` to `Cleaned`,
//! while the session is still alive. Cleanup deletes fixtures before the
//! session is released, on every path that acquired a session.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use taskwright_common::config::AppSettings;
use tracing::{error, info, info_span, warn, Instrument};

use crate::datasheet::DataSheet;
use crate::diagnostics::DiagnosticsCapturer;
use crate::error::{E2eError, E2eResult};
use crate::fixture::{FixtureId, FixtureStore, TaskFixture};
use crate::report::{EntryHandle, LogLevel, ReportSink, Verdict};
use crate::session::{Session, SessionConfig, SessionFactory, Viewport};
use crate::wait::WaitEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    SessionReady,
    FixturesReady,
    Running,
    Passed,
    Failed,
    Skipped,
    Cleaned,
    Reported,
}

impl LifecycleState {
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, SessionReady)
                | (Idle, Reported)
                | (SessionReady, FixturesReady)
                | (SessionReady, Failed)
                | (FixturesReady, Running)
                | (Running, Passed)
                | (Running, Failed)
                | (Running, Skipped)
                | (Passed, Cleaned)
                | (Failed, Cleaned)
                | (Skipped, Cleaned)
                | (Cleaned, Reported)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The body of a test
pub trait TestBody: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a TestContext) -> BoxFuture<'a, E2eResult<()>>;
}

struct FnBody<F>(F);

impl<F> TestBody for FnBody<F>
where
    F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, E2eResult<()>> + Send + Sync,
{
    fn run<'a>(&'a self, ctx: &'a TestContext) -> BoxFuture<'a, E2eResult<()>> {
        (self.0)(ctx)
    }
}

/// A test plus the fixtures it needs
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub tags: Vec<String>,
    pub viewport: Option<Viewport>,
    /// Title prefix owning this test's fixtures; cleaned up after every run
    pub fixture_prefix: Option<String>,
    pub fixtures: Vec<TaskFixture>,
    body: Arc<dyn TestBody>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, body: impl TestBody + 'static) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            viewport: None,
            fixture_prefix: None,
            fixtures: Vec::new(),
            body: Arc::new(body),
        }
    }

    /// Build a test from a closure returning a boxed future:
    ///
    /// ```ignore
    /// TestCase::from_fn("opens task page", |ctx| {
    ///     async move { ctx.session().goto(&ctx.app().task_page_url).await }.boxed()
    /// })
    /// ```
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext) -> BoxFuture<'a, E2eResult<()>> + Send + Sync + 'static,
    {
        Self::new(name, FnBody(f))
    }

    pub fn with_fixtures(mut self, prefix: impl Into<String>, fixtures: Vec<TaskFixture>) -> Self {
        self.fixture_prefix = Some(prefix.into());
        self.fixtures = fixtures;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn session_config(&self, base: &SessionConfig) -> SessionConfig {
        let mut config = base.clone();
        if let Some(viewport) = self.viewport {
            config.viewport = viewport;
        }
        config
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("fixture_prefix", &self.fixture_prefix)
            .field("fixtures", &self.fixtures.len())
            .finish()
    }
}

/// What a running test body can reach
pub struct TestContext {
    name: String,
    session: Arc<Session>,
    wait: WaitEngine,
    report: Arc<ReportSink>,
    entry: EntryHandle,
    app: AppSettings,
    data: Option<Arc<DataSheet>>,
    fixture_ids: Vec<FixtureId>,
}

impl TestContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn wait(&self) -> WaitEngine {
        self.wait
    }

    pub fn app(&self) -> &AppSettings {
        &self.app
    }

    pub fn fixture_ids(&self) -> &[FixtureId] {
        &self.fixture_ids
    }

    pub fn data(&self) -> E2eResult<&DataSheet> {
        self.data
            .as_deref()
            .ok_or_else(|| E2eError::DataSheet("no data sheet configured".into()))
    }

    /// Append an event to this test's report entry
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> E2eResult<()> {
        self.report.log(&self.entry, level, message)
    }

    pub fn info(&self, message: impl Into<String>) -> E2eResult<()> {
        self.log(LogLevel::Info, message)
    }
}

/// Outcome of one test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub verdict: Verdict,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transitions: Vec<LifecycleState>,
    pub fixtures_inserted: usize,
    pub fixtures_removed: usize,
    pub diagnostics_captured: bool,
    pub warnings: Vec<String>,
}

impl TestResult {
    /// Result for a test whose worker died before producing one
    pub fn aborted(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Failed,
            duration_ms: 0,
            error: Some(error.into()),
            transitions: vec![LifecycleState::Idle],
            fixtures_inserted: 0,
            fixtures_removed: 0,
            diagnostics_captured: false,
            warnings: Vec::new(),
        }
    }

    pub fn final_state(&self) -> LifecycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(LifecycleState::Idle)
    }
}

/// Bookkeeping for one pass through the state machine
struct Run {
    state: LifecycleState,
    transitions: Vec<LifecycleState>,
    error: Option<E2eError>,
    warnings: Vec<String>,
    fixtures_inserted: usize,
    fixtures_removed: usize,
    diagnostics_captured: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            transitions: vec![LifecycleState::Idle],
            error: None,
            warnings: Vec::new(),
            fixtures_inserted: 0,
            fixtures_removed: 0,
            diagnostics_captured: false,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        if !self.state.can_advance_to(next) {
            let err = E2eError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            };
            error!("{}", err);
            self.warnings.push(err.to_string());
            return;
        }
        self.state = next;
        self.transitions.push(next);
    }

    fn verdict(&self) -> Verdict {
        if self.transitions.contains(&LifecycleState::Passed) {
            Verdict::Passed
        } else if self.transitions.contains(&LifecycleState::Skipped) {
            Verdict::Skipped
        } else {
            Verdict::Failed
        }
    }

    fn into_result(self, name: &str, started: Instant) -> TestResult {
        TestResult {
            name: name.to_string(),
            verdict: self.verdict(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: self.error.map(|e| e.to_string()),
            transitions: self.transitions,
            fixtures_inserted: self.fixtures_inserted,
            fixtures_removed: self.fixtures_removed,
            diagnostics_captured: self.diagnostics_captured,
            warnings: self.warnings,
        }
    }
}

/// Drives each test through session, fixtures, body, diagnostics, cleanup
/// and reporting
pub struct LifecycleOrchestrator {
    factory: Arc<dyn SessionFactory>,
    fixtures: FixtureStore,
    report: Arc<ReportSink>,
    capturer: DiagnosticsCapturer,
    wait: WaitEngine,
    session_config: SessionConfig,
    app: AppSettings,
    data: Option<Arc<DataSheet>>,
    test_timeout: Option<Duration>,
}

impl LifecycleOrchestrator {
    pub fn new(factory: Arc<dyn SessionFactory>, fixtures: FixtureStore, report: Arc<ReportSink>) -> Self {
        Self {
            factory,
            fixtures,
            report,
            capturer: DiagnosticsCapturer::new(),
            wait: WaitEngine::default(),
            session_config: SessionConfig::default(),
            app: AppSettings::default(),
            data: None,
            test_timeout: None,
        }
    }

    pub fn with_wait(mut self, wait: WaitEngine) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn with_app(mut self, app: AppSettings) -> Self {
        self.app = app;
        self
    }

    pub fn with_data(mut self, data: Arc<DataSheet>) -> Self {
        self.data = Some(data);
        self
    }

    /// Fail a body that runs longer than `limit`
    pub fn with_test_timeout(mut self, limit: Duration) -> Self {
        self.test_timeout = Some(limit);
        self
    }

    pub fn report(&self) -> &Arc<ReportSink> {
        &self.report
    }

    /// Run one test through the full lifecycle
    pub async fn run(&self, case: &TestCase) -> TestResult {
        let span = info_span!("test", name = %case.name);
        self.run_lifecycle(case).instrument(span).await
    }

    async fn run_lifecycle(&self, case: &TestCase) -> TestResult {
        let started = Instant::now();
        let mut run = Run::new();

        let entry = match self.report.begin_entry(&case.name) {
            Ok(entry) => entry,
            Err(e) => {
                error!("Cannot open report entry: {}", e);
                run.error = Some(e);
                return run.into_result(&case.name, started);
            }
        };
        self.note(&entry, LogLevel::Info, format!("Test started: {}", case.name), &mut run);

        // Idle -> SessionReady
        let config = case.session_config(&self.session_config);
        let session = match self.factory.acquire(&config).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                let e = match e {
                    e @ E2eError::SessionStart(_) => e,
                    other => E2eError::SessionStart(other.to_string()),
                };
                error!("{}", e);
                self.note(&entry, LogLevel::Fail, e.to_string(), &mut run);
                run.error = Some(e);
                run.advance(LifecycleState::Reported);
                self.finish_report(&entry, Verdict::Failed, &mut run);
                return run.into_result(&case.name, started);
            }
        };
        run.advance(LifecycleState::SessionReady);
        self.record_system_info(&session);

        // SessionReady -> FixturesReady | Failed
        let fixture_ids = match self.provision(case, &mut run) {
            Ok(ids) => {
                run.advance(LifecycleState::FixturesReady);
                ids
            }
            Err(e) => {
                error!("{}", e);
                self.note(&entry, LogLevel::Fail, e.to_string(), &mut run);
                run.error = Some(e);
                run.advance(LifecycleState::Failed);
                Vec::new()
            }
        };

        // FixturesReady -> Running -> Passed | Failed | Skipped
        if run.state == LifecycleState::FixturesReady {
            run.advance(LifecycleState::Running);
            let ctx = TestContext {
                name: case.name.clone(),
                session: session.clone(),
                wait: self.wait,
                report: self.report.clone(),
                entry: entry.clone(),
                app: self.app.clone(),
                data: self.data.clone(),
                fixture_ids,
            };
            let outcome = self.execute(case, &ctx).await;
            drop(ctx);

            match outcome {
                Ok(()) => {
                    info!("Test passed: {}", case.name);
                    self.note(&entry, LogLevel::Pass, "Test passed", &mut run);
                    run.advance(LifecycleState::Passed);
                }
                Err(e) if e.is_skip() => {
                    info!("Test skipped: {}", case.name);
                    self.note(&entry, LogLevel::Skip, e.to_string(), &mut run);
                    run.error = Some(e);
                    run.advance(LifecycleState::Skipped);
                }
                Err(e) => {
                    self.note(&entry, LogLevel::Fail, format!("Test failed: {}", e), &mut run);
                    run.error = Some(e);
                    run.advance(LifecycleState::Failed);
                }
            }
        }

        // Failed -> diagnostics, once, while the session is alive
        if run.state == LifecycleState::Failed {
            let bundle = self.capturer.capture(session.driver(), &case.name).await;
            match self.capturer.attach(&bundle, &self.report, &entry) {
                Ok(attachments) if bundle.is_complete() => {
                    info!("Attached {} diagnostic artifact(s)", attachments.len());
                }
                Ok(attachments) => {
                    warn!(
                        "Partial diagnostics for {}: {} artifact(s) attached",
                        case.name,
                        attachments.len()
                    );
                }
                Err(e) => {
                    error!("Could not attach diagnostics: {}", e);
                    run.warnings.push(e.to_string());
                }
            }
            run.warnings.extend(bundle.warnings);
            run.diagnostics_captured = true;
        }

        // -> Cleaned: fixtures first, then the session
        if let Some(prefix) = &case.fixture_prefix {
            let cleanup = self.fixtures.cleanup(prefix);
            run.fixtures_removed = cleanup.deleted;
            for warning in cleanup.warnings {
                self.note(&entry, LogLevel::Warning, warning.clone(), &mut run);
                run.warnings.push(warning);
            }
        }
        self.factory.release(&session).await;
        run.advance(LifecycleState::Cleaned);

        // Cleaned -> Reported
        let verdict = run.verdict();
        self.finish_report(&entry, verdict, &mut run);
        run.advance(LifecycleState::Reported);

        run.into_result(&case.name, started)
    }

    fn provision(&self, case: &TestCase, run: &mut Run) -> E2eResult<Vec<FixtureId>> {
        if case.fixtures.is_empty() {
            return Ok(Vec::new());
        }
        let prefix = case.fixture_prefix.as_deref().unwrap_or_default();

        let mut ids = Vec::with_capacity(case.fixtures.len());
        for record in &case.fixtures {
            if !record.owned_by(prefix) {
                return Err(E2eError::FixtureProvision {
                    title: record.title.clone(),
                    reason: format!("title does not start with the test's prefix '{}'", prefix),
                });
            }
            let id = self.fixtures.insert(record)?;
            info!("Provisioned fixture '{}' ({})", record.title, id);
            run.fixtures_inserted += 1;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn execute(&self, case: &TestCase, ctx: &TestContext) -> E2eResult<()> {
        let body = AssertUnwindSafe(case.body.run(ctx)).catch_unwind();

        let outcome = match self.test_timeout {
            Some(limit) => match tokio::time::timeout(limit, body).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(E2eError::Timeout {
                        what: format!("test body of {}", case.name),
                        waited_ms: limit.as_millis() as u64,
                        last_error: None,
                    })
                }
            },
            None => body.await,
        };

        match outcome {
            Ok(result) => result,
            Err(panic) => Err(E2eError::AssertionFailed(format!(
                "test body panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    fn record_system_info(&self, session: &Session) {
        let browser = session.browser();
        let facts = [
            ("OS", std::env::consts::OS.to_string()),
            ("Browser", browser.name.clone()),
            ("Browser Version", browser.version.clone()),
        ];
        for (key, value) in facts {
            if let Err(e) = self.report.set_system_info(key, value) {
                warn!("Could not record system info {}: {}", key, e);
            }
        }
    }

    fn note(&self, entry: &EntryHandle, level: LogLevel, message: impl Into<String>, run: &mut Run) {
        if let Err(e) = self.report.log(entry, level, message) {
            error!("Report log failed: {}", e);
            run.warnings.push(e.to_string());
        }
    }

    fn finish_report(&self, entry: &EntryHandle, verdict: Verdict, run: &mut Run) {
        if let Err(e) = self.report.finish_entry(entry, verdict) {
            error!("Report entry could not be finished: {}", e);
            run.warnings.push(e.to_string());
        }
        if let Err(e) = self.report.flush() {
            warn!("Report flush failed: {}", e);
            run.warnings.push(format!("report flush failed: {}", e));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use LifecycleState::*;

    #[test_case(Idle, SessionReady, true)]
    #[test_case(Idle, Reported, true)]
    #[test_case(SessionReady, Failed, true)]
    #[test_case(Running, Skipped, true)]
    #[test_case(Failed, Cleaned, true)]
    #[test_case(Cleaned, Reported, true)]
    #[test_case(Idle, Running, false)]
    #[test_case(SessionReady, Running, false)]
    #[test_case(Passed, Reported, false)]
    #[test_case(Reported, Idle, false)]
    #[test_case(Cleaned, Cleaned, false)]
    fn test_transitions(from: LifecycleState, to: LifecycleState, legal: bool) {
        assert_eq!(from.can_advance_to(to), legal);
    }

    #[test]
    fn test_illegal_advance_is_recorded_not_applied() {
        let mut run = Run::new();
        run.advance(Running);
        assert_eq!(run.state, Idle);
        assert_eq!(run.warnings.len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
