//! Suite runner: runs test cases on parallel workers through the lifecycle
//! orchestrator
//!
//! Cleanup deletes every row under a case's fixture prefix, so cases whose
//! prefixes nest ("Test Task" and "Test Task B") share one lane and run one
//! after the other. Independent lanes run in parallel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::E2eResult;
use crate::lifecycle::{LifecycleOrchestrator, TestCase, TestResult};
use crate::report::Verdict;

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let count = |verdict: Verdict| results.iter().filter(|r| r.verdict == verdict).count();
        Self {
            total: results.len(),
            passed: count(Verdict::Passed),
            failed: count(Verdict::Failed),
            skipped: count(Verdict::Skipped),
            duration_ms,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Write results to `<output_dir>/test-results.json`
    pub fn write_results(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let results_path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&results_path, json)?;
        info!("Results written to {}", results_path.display());
        Ok(results_path)
    }
}

/// Which cases to run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub tag: Option<String>,
    pub name: Option<String>,
}

impl Selection {
    pub fn matches(&self, case: &TestCase) -> bool {
        self.tag.as_deref().map_or(true, |tag| case.has_tag(tag))
            && self.name.as_deref().map_or(true, |name| case.name == name)
    }

    pub fn apply(&self, cases: Vec<TestCase>) -> Vec<TestCase> {
        cases.into_iter().filter(|c| self.matches(c)).collect()
    }
}

/// Runs test cases with bounded parallelism
pub struct SuiteRunner {
    orchestrator: Arc<LifecycleOrchestrator>,
    workers: usize,
}

impl SuiteRunner {
    pub fn new(orchestrator: LifecycleOrchestrator, workers: usize) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            workers: workers.max(1),
        }
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.orchestrator
    }

    /// Run every case; results come back in input order
    pub async fn run(&self, cases: Vec<TestCase>) -> TestSuiteResult {
        let start = Instant::now();
        info!("Running {} test(s) on {} worker(s)...", cases.len(), self.workers);

        let lanes = prefix_lanes(&cases);
        for lane in lanes.iter().filter(|lane| lane.len() > 1) {
            let names: Vec<&str> = lane.iter().map(|&i| cases[i].name.as_str()).collect();
            warn!("Nested fixture prefixes, running serially: {}", names.join(", "));
        }

        let mut slots: Vec<Option<TestCase>> = cases.into_iter().map(Some).collect();
        let lanes: Vec<Vec<(usize, TestCase)>> = lanes
            .into_iter()
            .map(|lane| {
                lane.into_iter()
                    .filter_map(|i| slots[i].take().map(|case| (i, case)))
                    .collect::<Vec<_>>()
            })
            .collect();

        let finished: Vec<Vec<(usize, TestResult)>> = stream::iter(lanes.into_iter().map(|lane| {
            let orchestrator = self.orchestrator.clone();
            async move {
                let mut results = Vec::with_capacity(lane.len());
                for (index, case) in lane {
                    results.push((index, run_on_worker(orchestrator.clone(), case).await));
                }
                results
            }
        }))
        .buffer_unordered(self.workers)
        .collect()
        .await;

        let mut indexed: Vec<(usize, TestResult)> = finished.into_iter().flatten().collect();
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<TestResult> = indexed.into_iter().map(|(_, result)| result).collect();

        for result in &results {
            match result.verdict {
                Verdict::Passed => info!("✓ {} ({}ms)", result.name, result.duration_ms),
                Verdict::Skipped => info!("- {} skipped", result.name),
                Verdict::Failed => error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("Unknown error")
                ),
            }
        }

        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);
        info!(
            "Test suite complete: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        suite
    }
}

async fn run_on_worker(orchestrator: Arc<LifecycleOrchestrator>, case: TestCase) -> TestResult {
    let name = case.name.clone();
    match tokio::spawn(async move { orchestrator.run(&case).await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("Worker for {} died: {}", name, e);
            TestResult::aborted(name, format!("worker died: {}", e))
        }
    }
}

fn prefixes_nest(a: &TestCase, b: &TestCase) -> bool {
    match (a.fixture_prefix.as_deref(), b.fixture_prefix.as_deref()) {
        (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
        _ => false,
    }
}

/// Case indices grouped so that nesting prefixes land in the same lane.
/// Lanes and the indices inside them keep input order.
fn prefix_lanes(cases: &[TestCase]) -> Vec<Vec<usize>> {
    let mut lane_of: Vec<usize> = (0..cases.len()).collect();
    for i in 0..cases.len() {
        for j in 0..i {
            if !prefixes_nest(&cases[i], &cases[j]) {
                continue;
            }
            let (from, to) = (lane_of[i].max(lane_of[j]), lane_of[i].min(lane_of[j]));
            for lane in lane_of.iter_mut().filter(|lane| **lane == from) {
                *lane = to;
            }
        }
    }

    let mut lanes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, lane) in lane_of.into_iter().enumerate() {
        lanes.entry(lane).or_default().push(index);
    }
    lanes.into_values().collect()
}
