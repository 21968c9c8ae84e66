//! Fakes shared by the integration tests: an in-memory task manager
//! rendered through a scripted browser, and a session factory that counts
//! what it hands out.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use taskwright_common::config::AppSettings;
use taskwright_common::{BackingStore, Database};
use taskwright_e2e::session::{BrowserInfo, ConsoleEntry, ElementRef};
use taskwright_e2e::{
    BrowserDriver, DataSheet, E2eError, E2eResult, FixtureStore, LifecycleOrchestrator, Locator, ReportConfig,
    ReportSink, Session, SessionConfig, SessionFactory, WaitEngine,
};

const STATIC_IDS: &[&str] = &[
    "login_username",
    "login_password",
    "login_submit",
    "task-search-title",
    "task-search-description",
    "task-search-completed",
    "task-search-not-completed",
    "task-search-btn-consult-records",
    "task-search-btn-create-record",
];
const NO_CONTENT_MESSAGE: &str = "task-search-no-content-message";
const LOGIN_FIELDS: &[(&str, &str)] = &[
    ("login_username", "Login is required"),
    ("login_password", "Password is required"),
];
const LOGIN_TOAST: &str = "toast-container";
const FIELD_ERRORS: &str = "error-messages";
const REJECTED_LOGIN: &str = "Invalid login or password";
const ACTION_EDIT: &str = "task-search-action-update-task";
const ACTION_DELETE: &str = "task-search-action-remove-task";
const RESULT_ROWS: &str = "tbody tr:not(#task-search-no-content)";
const DUE_DATE_INPUT: &str = "input[formControlName='dueDate']";
const ROW_CHILDREN: &[&str] = &[
    "task-search-column-task-title",
    "task-search-column-task-description",
    "task-search-column-task-duedate",
    "task-search-column-task-completed",
    "task-search-action-update-task",
    "task-search-action-remove-task",
];

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

fn missing(locator: &Locator) -> E2eError {
    E2eError::webdriver("no such element", format!("Unable to locate element: {}", locator))
}

/// The application under test: a task table plus a few switches
#[derive(Clone)]
pub struct FakeApp {
    pub db: Database,
    pub settings: AppSettings,
    /// Element lookups after a search before the result table renders
    pub render_after: u32,
    pub broken_screenshot: bool,
    /// The one account the login form accepts
    pub account: (String, String),
    screenshots: Arc<AtomicUsize>,
}

impl FakeApp {
    pub fn new() -> Self {
        Self {
            db: Database::open_memory().unwrap(),
            settings: AppSettings::default(),
            render_after: 3,
            broken_screenshot: false,
            account: ("admin".into(), "admin123".into()),
            screenshots: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_broken_screenshot(mut self) -> Self {
        self.broken_screenshot = true;
        self
    }

    pub fn fixture_store(&self) -> FixtureStore {
        FixtureStore::new(Arc::new(self.db.clone()))
    }

    /// Screenshots taken across all sessions
    pub fn screenshots(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    pub fn task_count(&self) -> usize {
        let rows = self.db.query("SELECT COUNT(*) AS n FROM task", &[]).unwrap();
        rows[0].get_i64("n").unwrap() as usize
    }

    fn search(&self, title: &str, description: &str) -> E2eResult<Vec<TaskLine>> {
        let rows = self.db.query(
            "SELECT id, title, description, due_date, completed FROM task \
             WHERE title LIKE ?1 AND description LIKE ?2 ORDER BY id",
            &[format!("%{}%", title).into(), format!("%{}%", description).into()],
        )?;
        Ok(rows
            .iter()
            .map(|row| TaskLine {
                id: row.get_i64("id").unwrap_or_default(),
                title: row.get_str("title").unwrap_or_default().to_string(),
                description: row.get_str("description").unwrap_or_default().to_string(),
                due_date: row.get_str("due_date").unwrap_or_default().to_string(),
                completed: row.get_bool("completed").unwrap_or(false),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct TaskLine {
    id: i64,
    title: String,
    description: String,
    due_date: String,
    completed: bool,
}

impl TaskLine {
    fn cell(&self, column: &str) -> String {
        match column {
            "task-search-column-task-title" => self.title.clone(),
            "task-search-column-task-description" => self.description.clone(),
            "task-search-column-task-duedate" => self.due_date.clone(),
            "task-search-column-task-completed" => if self.completed { "Yes" } else { "No" }.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Default)]
enum SearchState {
    #[default]
    Idle,
    Pending {
        lookups_left: u32,
        title: String,
        description: String,
    },
    Rendered(Vec<TaskLine>),
}

#[derive(Default)]
struct Page {
    url: String,
    inputs: HashMap<String, String>,
    /// Inputs the user has typed into or cleared
    touched: HashSet<String>,
    checked: HashSet<String>,
    toast: Option<String>,
    search: SearchState,
    console: Vec<ConsoleEntry>,
}

impl Page {
    fn rows(&self) -> &[TaskLine] {
        match &self.search {
            SearchState::Rendered(rows) => rows,
            _ => &[],
        }
    }

    fn row(&self, id: i64) -> Option<&TaskLine> {
        self.rows().iter().find(|r| r.id == id)
    }

    fn input(&self, key: &str) -> &str {
        self.inputs.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Inline validation messages for touched, empty login fields
    fn field_errors(&self) -> Vec<&'static str> {
        LOGIN_FIELDS
            .iter()
            .filter(|(key, _)| self.touched.contains(*key) && self.input(key).is_empty())
            .map(|(_, message)| *message)
            .collect()
    }
}

/// One browser window onto the fake app
pub struct FakeBrowser {
    app: FakeApp,
    page: Mutex<Page>,
    quits: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn new(app: FakeApp, quits: Arc<AtomicUsize>) -> Self {
        Self {
            app,
            page: Mutex::new(Page::default()),
            quits,
        }
    }

    /// Advance a pending search; the table renders after a few lookups
    fn tick(&self, page: &mut Page) -> E2eResult<()> {
        if let SearchState::Pending {
            lookups_left,
            title,
            description,
        } = &mut page.search
        {
            if *lookups_left > 0 {
                *lookups_left -= 1;
                return Ok(());
            }
            let rows = self.app.search(title, description)?;
            page.search = SearchState::Rendered(rows);
        }
        Ok(())
    }

    fn locate(&self, page: &Page, locator: &Locator) -> Vec<ElementRef> {
        match locator {
            Locator::Id(id) if STATIC_IDS.contains(&id.as_str()) => vec![ElementRef::new(format!("#{}", id))],
            Locator::Id(id) if id == LOGIN_TOAST && page.toast.is_some() => {
                vec![ElementRef::new(format!("#{}", id))]
            }
            Locator::Id(id) if id == FIELD_ERRORS && !page.field_errors().is_empty() => {
                vec![ElementRef::new(format!("#{}", id))]
            }
            Locator::Id(id) if id == NO_CONTENT_MESSAGE => match &page.search {
                SearchState::Rendered(rows) if rows.is_empty() => vec![ElementRef::new(format!("#{}", id))],
                _ => Vec::new(),
            },
            Locator::Id(id) if ROW_CHILDREN.contains(&id.as_str()) => page
                .rows()
                .iter()
                .map(|row| ElementRef::new(format!("row:{}/{}", row.id, id)))
                .collect(),
            Locator::Css(css) if css == RESULT_ROWS => page
                .rows()
                .iter()
                .map(|row| ElementRef::new(format!("row:{}", row.id)))
                .collect(),
            Locator::Css(css) if css == DUE_DATE_INPUT => vec![ElementRef::new("#dueDate")],
            _ => Vec::new(),
        }
    }

    fn row_id(element: &ElementRef) -> Option<i64> {
        let rest = element.id().strip_prefix("row:")?;
        rest.split('/').next()?.parse().ok()
    }

    fn input_key(element: &ElementRef) -> Option<&str> {
        element.id().strip_prefix('#')
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        let mut page = self.page.lock();
        page.url = url.to_string();
        page.search = SearchState::Idle;
        page.console.push(ConsoleEntry {
            timestamp: 1_720_000_000_000,
            level: "INFO".into(),
            message: format!("navigated to {}", url),
        });
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(self.page.lock().url.clone())
    }

    async fn find(&self, locator: &Locator) -> E2eResult<ElementRef> {
        let mut page = self.page.lock();
        self.tick(&mut page)?;
        self.locate(&page, locator)
            .into_iter()
            .next()
            .ok_or_else(|| missing(locator))
    }

    async fn find_all(&self, locator: &Locator) -> E2eResult<Vec<ElementRef>> {
        let mut page = self.page.lock();
        self.tick(&mut page)?;
        Ok(self.locate(&page, locator))
    }

    async fn find_in(&self, parent: &ElementRef, locator: &Locator) -> E2eResult<ElementRef> {
        let page = self.page.lock();
        let id = Self::row_id(parent)
            .filter(|id| page.row(*id).is_some())
            .ok_or_else(|| E2eError::webdriver("stale element reference", parent.id().to_string()))?;
        match locator {
            Locator::Id(child) if ROW_CHILDREN.contains(&child.as_str()) => {
                Ok(ElementRef::new(format!("row:{}/{}", id, child)))
            }
            _ => Err(missing(locator)),
        }
    }

    async fn click(&self, element: &ElementRef) -> E2eResult<()> {
        let mut page = self.page.lock();
        match element.id() {
            "#login_submit" => {
                let (user, password) = &self.app.account;
                if page.input("login_username") == user && page.input("login_password") == password {
                    page.toast = None;
                    page.url = self.app.settings.application_url.clone();
                } else {
                    page.toast = Some(REJECTED_LOGIN.to_string());
                }
            }
            "#task-search-btn-consult-records" => {
                let title = page.inputs.get("task-search-title").cloned().unwrap_or_default();
                let description = page.inputs.get("task-search-description").cloned().unwrap_or_default();
                page.search = SearchState::Pending {
                    lookups_left: self.app.render_after,
                    title,
                    description,
                };
            }
            id @ ("#task-search-completed" | "#task-search-not-completed") => {
                let key = id.trim_start_matches('#').to_string();
                if !page.checked.remove(&key) {
                    page.checked.insert(key);
                }
            }
            other => {
                let Some(id) = Self::row_id(element).filter(|id| page.row(*id).is_some()) else {
                    return Ok(());
                };
                if other.ends_with(ACTION_EDIT) {
                    page.url = format!("{}/edit/{}", self.app.settings.task_page_url, id);
                } else if other.ends_with(ACTION_DELETE) {
                    self.app.db.execute("DELETE FROM task WHERE id = ?1", &[id.into()])?;
                    if let SearchState::Rendered(rows) = &mut page.search {
                        rows.retain(|row| row.id != id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> E2eResult<()> {
        if let Some(key) = Self::input_key(element) {
            let mut page = self.page.lock();
            page.inputs.remove(key);
            page.touched.insert(key.to_string());
        }
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> E2eResult<()> {
        let key = Self::input_key(element)
            .ok_or_else(|| E2eError::webdriver("element not interactable", element.id().to_string()))?;
        let mut page = self.page.lock();
        page.inputs.entry(key.to_string()).or_default().push_str(text);
        page.touched.insert(key.to_string());
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> E2eResult<String> {
        let page = self.page.lock();
        if element.id() == format!("#{}", NO_CONTENT_MESSAGE) {
            return Ok("No records found".to_string());
        }
        if element.id() == format!("#{}", LOGIN_TOAST) {
            return Ok(page.toast.clone().unwrap_or_default());
        }
        if element.id() == format!("#{}", FIELD_ERRORS) {
            return Ok(page.field_errors().join("\n"));
        }
        if let Some(id) = Self::row_id(element) {
            let row = page
                .row(id)
                .ok_or_else(|| E2eError::webdriver("stale element reference", element.id().to_string()))?;
            let column = element.id().rsplit('/').next().unwrap_or_default();
            return Ok(row.cell(column));
        }
        Ok(Self::input_key(element)
            .and_then(|key| page.inputs.get(key).cloned())
            .unwrap_or_default())
    }

    async fn is_displayed(&self, _element: &ElementRef) -> E2eResult<bool> {
        Ok(true)
    }

    async fn is_enabled(&self, element: &ElementRef) -> E2eResult<bool> {
        if element.id() == "#login_submit" {
            let page = self.page.lock();
            return Ok(LOGIN_FIELDS.iter().all(|(key, _)| !page.input(key).is_empty()));
        }
        Ok(true)
    }

    async fn is_selected(&self, element: &ElementRef) -> E2eResult<bool> {
        let key = element.id().trim_start_matches('#');
        Ok(self.page.lock().checked.contains(key))
    }

    async fn console_logs(&self) -> E2eResult<Vec<ConsoleEntry>> {
        Ok(self.page.lock().console.clone())
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        if self.app.broken_screenshot {
            return Err(E2eError::webdriver("unknown error", "screenshot failed"));
        }
        self.app.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(PNG_MAGIC.to_vec())
    }

    async fn page_source(&self) -> E2eResult<String> {
        let page = self.page.lock();
        Ok(format!("<html><body data-url=\"{}\"></body></html>", page.url))
    }

    async fn quit(&self) -> E2eResult<()> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake browser sessions and counts them
pub struct CountingFactory {
    app: FakeApp,
    fail_with: Option<String>,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn new(app: FakeApp) -> Self {
        Self {
            app,
            fail_with: None,
            acquired: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A factory whose browser never starts
    pub fn failing(app: FakeApp, reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::new(app)
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn acquire(&self, config: &SessionConfig) -> E2eResult<Session> {
        if let Some(reason) = &self.fail_with {
            return Err(E2eError::webdriver("session not created", reason.clone()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let browser = FakeBrowser::new(self.app.clone(), self.released.clone());
        Ok(Session::new(
            format!("fake-{}", n),
            Box::new(browser),
            config.clone(),
            BrowserInfo {
                name: "fakebrowser".into(),
                version: "1.0".into(),
            },
        ))
    }
}

pub fn credentials() -> DataSheet {
    DataSheet::from_yaml(
        r#"
LoginCredentials:
  - [Username, Password]
  - [admin, admin123]
"#,
    )
    .unwrap()
}

pub fn fast_wait() -> WaitEngine {
    WaitEngine::new(Duration::from_millis(500), Duration::from_millis(5))
}

/// Everything one integration test needs, rooted in a temp directory
pub struct Harness {
    pub app: FakeApp,
    pub factory: Arc<CountingFactory>,
    pub report: Arc<ReportSink>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_app(FakeApp::new())
    }

    pub fn with_app(app: FakeApp) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportSink::new(ReportConfig {
            output_dir: dir.path().join("reports"),
            report_name: "TestReport".into(),
        });
        Self {
            factory: Arc::new(CountingFactory::new(app.clone())),
            app,
            report: Arc::new(report),
            dir,
        }
    }

    pub fn with_factory(make: impl FnOnce(FakeApp) -> CountingFactory) -> Self {
        let mut harness = Self::with_app(FakeApp::new());
        harness.factory = Arc::new(make(harness.app.clone()));
        harness
    }

    pub fn orchestrator(&self) -> LifecycleOrchestrator {
        LifecycleOrchestrator::new(self.factory.clone(), self.app.fixture_store(), self.report.clone())
            .with_wait(fast_wait())
            .with_app(self.app.settings.clone())
            .with_data(Arc::new(credentials()))
    }
}
