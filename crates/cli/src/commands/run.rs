//! Run Commands

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use taskwright_common::HarnessConfig;
use taskwright_e2e::report::ReportConfig;
use taskwright_e2e::{
    DataSheet, DriverConfig, DriverProcess, LifecycleOrchestrator, ReportSink, Selection, SessionConfig,
    SuiteRunner, TestResult, TestSpec, TestSuiteResult, Verdict, WaitEngine, WebDriverFactory,
};
use tracing::{info, warn};

use super::fixture_store;
use crate::output::{print_info, print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct RunArgs {
    /// Directory holding YAML test specs
    #[arg(short, long, default_value = "specs")]
    pub specs: PathBuf,

    /// Run only tests matching this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Parallel workers (overrides [runner].workers)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Report directory (overrides [report].output_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// One line of the run summary
#[derive(Serialize)]
struct ResultLine<'a> {
    name: &'a str,
    verdict: Verdict,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> From<&'a TestResult> for ResultLine<'a> {
    fn from(result: &'a TestResult) -> Self {
        Self {
            name: &result.name,
            verdict: result.verdict,
            duration_ms: result.duration_ms,
            error: result.error.as_deref(),
        }
    }
}

impl TableDisplay for ResultLine<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Verdict", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        let verdict = match self.verdict {
            Verdict::Passed => "✓ passed".green().to_string(),
            Verdict::Failed => "✗ failed".red().to_string(),
            Verdict::Skipped => "- skipped".yellow().to_string(),
        };
        vec![
            self.name.to_string(),
            verdict,
            format!("{} ms", self.duration_ms),
            self.error.unwrap_or_default().to_string(),
        ]
    }
}

/// Run the selected specs; `Ok(false)` when any test failed
pub async fn execute(args: RunArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<bool> {
    if let Some(output) = args.output {
        config.report.output_dir = output;
    }
    if let Some(workers) = args.workers {
        config.runner.workers = workers;
    }

    let specs = TestSpec::load_all(&args.specs)
        .with_context(|| format!("loading specs from {}", args.specs.display()))?;
    let selection = Selection {
        tag: args.tag,
        name: args.name,
    };
    let cases = selection.apply(specs.into_iter().map(TestSpec::into_case).collect());
    if cases.is_empty() {
        print_warning("No tests matched the selection");
        return Ok(true);
    }
    info!("Selected {} test(s) from {}", cases.len(), args.specs.display());

    // Keep the driver alive until the suite is done; dropping it stops the process
    let (driver_url, driver) = match &config.browser.driver_url {
        Some(url) => {
            info!("Using running WebDriver endpoint {}", url);
            (url.clone(), None)
        }
        None => {
            let process = DriverProcess::spawn(DriverConfig::from(&config.browser))
                .await
                .context("starting browser driver")?;
            (process.base_url().to_string(), Some(process))
        }
    };

    let suite = run_suite(cases, &config, &driver_url).await?;
    drop(driver);

    let results_path = suite.write_results(&config.report.output_dir)?;
    let lines: Vec<ResultLine> = suite.results.iter().map(ResultLine::from).collect();
    print_list(&lines, format);
    print_info(&format!("Results written to {}", results_path.display()));

    let summary = format!(
        "{} passed, {} failed, {} skipped in {} ms",
        suite.passed, suite.failed, suite.skipped, suite.duration_ms
    );
    if suite.all_passed() {
        print_success(&summary);
    } else {
        print_warning(&summary);
    }
    Ok(suite.all_passed())
}

async fn run_suite(
    cases: Vec<taskwright_e2e::TestCase>,
    config: &HarnessConfig,
    driver_url: &str,
) -> Result<TestSuiteResult> {
    let factory = WebDriverFactory::new(driver_url)?;
    let report = Arc::new(ReportSink::new(ReportConfig::from(&config.report)));

    let mut orchestrator = LifecycleOrchestrator::new(Arc::new(factory), fixture_store(config), report.clone())
        .with_wait(WaitEngine::from(&config.wait))
        .with_session_config(SessionConfig::from(&config.browser))
        .with_app(config.app.clone());

    let sheet_path = &config.data.sheet_path;
    if sheet_path.exists() {
        let sheet = DataSheet::load(sheet_path)?;
        orchestrator = orchestrator.with_data(Arc::new(sheet));
    } else {
        warn!("Data sheet {} not found; login steps will fail", sheet_path.display());
    }
    if let Some(ms) = config.runner.test_timeout_ms {
        orchestrator = orchestrator.with_test_timeout(Duration::from_millis(ms));
    }

    let suite = SuiteRunner::new(orchestrator, config.runner.workers).run(cases).await;
    if let Some(path) = report.flush()? {
        print_info(&format!("Report written to {}", path.display()));
    }
    Ok(suite)
}
