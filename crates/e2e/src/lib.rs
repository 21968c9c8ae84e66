//! Taskwright end-to-end harness
//!
//! This crate drives a real browser against the task manager web app and
//! owns everything around a test body:
//! - Starts browser sessions through a WebDriver endpoint
//! - Synchronizes with the page through a single polling wait primitive
//! - Seeds and purges task fixtures in the backing store
//! - Records a per-run JSON report with screenshots, page source and console logs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SuiteRunner (parallel workers)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LifecycleOrchestrator::run(case) -> TestResult             │
//! │    ├── ReportSink::begin_entry                              │
//! │    ├── SessionFactory::acquire -> Session                   │
//! │    ├── FixtureStore::insert       (each declared fixture)   │
//! │    ├── TestBody::run(ctx)      (WaitEngine, page objects)   │
//! │    ├── DiagnosticsCapturer::capture   (on failure only)     │
//! │    ├── FixtureStore::cleanup(prefix)                        │
//! │    ├── SessionFactory::release                              │
//! │    └── ReportSink::finish_entry + flush                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (YAML) -> TestCase                                │
//! │    ├── name, tags, viewport, login                          │
//! │    ├── fixture_prefix, fixtures: [TaskFixture]              │
//! │    └── steps: navigate | click | fill | check | wait_for    │
//! │               wait_for_url | assert_text | assert_count     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod datasheet;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod lifecycle;
pub mod pages;
pub mod report;
pub mod runner;
pub mod session;
pub mod spec;
pub mod steps;
pub mod wait;
pub mod webdriver;

pub use datasheet::DataSheet;
pub use diagnostics::{DiagnosticsBundle, DiagnosticsCapturer};
pub use driver::{DriverConfig, DriverProcess};
pub use error::{E2eError, E2eResult};
pub use fixture::{CleanupReport, FixtureId, FixtureStore, TaskFixture};
pub use lifecycle::{LifecycleOrchestrator, LifecycleState, TestBody, TestCase, TestContext, TestResult};
pub use report::{ReportConfig, ReportSink, Verdict};
pub use runner::{Selection, SuiteRunner, TestSuiteResult};
pub use session::{BrowserDriver, BrowserKind, Locator, Session, SessionConfig, SessionFactory};
pub use spec::{TestSpec, TestStep};
pub use wait::{WaitEngine, WaitSpec};
pub use webdriver::{WebDriverClient, WebDriverFactory};
