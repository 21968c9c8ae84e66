//! Lifecycle guarantees, exercised against the fake task manager

mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use support::{CountingFactory, FakeApp, Harness};
use taskwright_e2e::report::{ArtifactKind, ReportDocument};
use taskwright_e2e::{E2eError, LifecycleState, SuiteRunner, TaskFixture, TestCase, Verdict};

use LifecycleState::*;

fn two_fixtures(prefix: &str) -> Vec<TaskFixture> {
    vec![
        TaskFixture::new(format!("{} 1", prefix)).description("first").due("2024-07-15"),
        TaskFixture::new(format!("{} 2", prefix)).description("second").completed(true),
    ]
}

#[tokio::test]
async fn passing_test_walks_the_happy_path() {
    let h = Harness::new();
    let store = h.app.fixture_store();
    let case = TestCase::from_fn("happy path", move |ctx| {
        let store = store.clone();
        async move {
            assert_eq!(ctx.fixture_ids().len(), 2);
            assert_eq!(store.count_by_prefix("LC Happy")?, 2);
            ctx.session().goto(&ctx.app().task_page_url).await?;
            ctx.info("on the task page")
        }
        .boxed()
    })
    .with_fixtures("LC Happy", two_fixtures("LC Happy"));

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Passed, "{:?}", result.error);
    assert_eq!(
        result.transitions,
        vec![Idle, SessionReady, FixturesReady, Running, Passed, Cleaned, Reported]
    );
    assert_eq!((result.fixtures_inserted, result.fixtures_removed), (2, 2));
    assert!(!result.diagnostics_captured);
    assert_eq!(h.app.task_count(), 0);
    assert_eq!(h.factory.acquired(), 1);
    assert_eq!(h.factory.released(), 1);
    assert_eq!(h.app.screenshots(), 0);

    let doc = h.report.snapshot().unwrap();
    let entry = doc.entries_named("happy path").next().unwrap();
    assert_eq!(entry.verdict, Some(Verdict::Passed));
    assert!(entry.attachments.is_empty());
    assert!(entry.events.iter().any(|e| e.message == "on the task page"));
    assert_eq!(doc.system_info.get("Browser").map(String::as_str), Some("fakebrowser"));
}

#[tokio::test]
async fn failing_body_gets_diagnostics_once_and_fixtures_removed() {
    let h = Harness::new();
    let case = TestCase::from_fn("fails mid run", |ctx| {
        async move {
            ctx.session().goto(&ctx.app().task_page_url).await?;
            Err(E2eError::AssertionFailed("row not as expected".into()))
        }
        .boxed()
    })
    .with_fixtures("LC Fail", two_fixtures("LC Fail"));

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.final_state(), Reported);
    assert!(result.error.as_deref().unwrap().contains("row not as expected"));
    assert!(result.diagnostics_captured);
    assert_eq!(h.app.screenshots(), 1);
    assert_eq!(h.app.task_count(), 0);
    assert_eq!(h.factory.released(), 1);

    let doc = h.report.snapshot().unwrap();
    let entry = doc.entries_named("fails mid run").next().unwrap();
    let kinds: Vec<_> = entry.attachments.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![ArtifactKind::ConsoleLog, ArtifactKind::Screenshot, ArtifactKind::PageSource]
    );
    let shot = &entry.attachments[1];
    assert_eq!(std::fs::read(&shot.path).unwrap(), support::PNG_MAGIC);
    assert!(shot.sha256.is_some());
}

#[tokio::test]
async fn broken_screenshot_does_not_hide_the_failure() {
    let h = Harness::with_app(FakeApp::new().with_broken_screenshot());
    let case = TestCase::from_fn("no screenshot", |_ctx| {
        async { Err(E2eError::AssertionFailed("original failure".into())) }.boxed()
    });

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.error.as_deref().unwrap().contains("original failure"));
    assert!(result.warnings.iter().any(|w| w.contains("screenshot")));

    let doc = h.report.snapshot().unwrap();
    let entry = doc.entries_named("no screenshot").next().unwrap();
    assert!(entry.attachments.iter().all(|a| a.kind != ArtifactKind::Screenshot));
    assert_eq!(entry.attachments.len(), 2);
}

#[tokio::test]
async fn panicking_body_fails_and_still_tears_down() {
    let h = Harness::new();
    let case = TestCase::from_fn("panics", |_ctx| {
        async {
            let rows: Vec<&str> = Vec::new();
            assert!(!rows.is_empty(), "kaboom: no rows");
            Ok(())
        }
        .boxed()
    })
    .with_fixtures("LC Panic", two_fixtures("LC Panic"));

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.error.as_deref().unwrap().contains("kaboom"));
    assert!(result.diagnostics_captured);
    assert_eq!(h.app.task_count(), 0);
    assert_eq!(h.factory.released(), 1);
}

#[tokio::test]
async fn session_failure_is_reported_without_touching_fixtures() {
    let h = Harness::with_factory(|app| CountingFactory::failing(app, "chrome not reachable"));
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let case = TestCase::from_fn("no browser", move |_ctx| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    })
    .with_fixtures("LC Nobrowser", two_fixtures("LC Nobrowser"));

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(result.transitions, vec![Idle, Reported]);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("Browser session failed to start"));
    assert_eq!(result.fixtures_inserted, 0);
    assert!(!result.diagnostics_captured);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(h.app.task_count(), 0);

    let doc = h.report.snapshot().unwrap();
    let entry = doc.entries_named("no browser").next().unwrap();
    assert_eq!(entry.verdict, Some(Verdict::Failed));
}

#[tokio::test]
async fn fixture_outside_prefix_fails_before_the_body() {
    let h = Harness::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let case = TestCase::from_fn("stray fixture", move |_ctx| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    })
    .with_fixtures(
        "LC Own",
        vec![TaskFixture::new("LC Own 1"), TaskFixture::new("Someone else's task")],
    );

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(
        result.transitions,
        vec![Idle, SessionReady, Failed, Cleaned, Reported]
    );
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(result.fixtures_inserted, 1);
    assert_eq!(result.fixtures_removed, 1);
    assert!(result.diagnostics_captured);
    assert_eq!(h.app.task_count(), 0);
    assert_eq!(h.factory.released(), 1);
}

#[tokio::test]
async fn skip_is_its_own_verdict() {
    let h = Harness::new();
    let case = TestCase::from_fn("skipped", |_ctx| {
        async { Err(E2eError::Skipped("feature flag off".into())) }.boxed()
    });

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Skipped);
    assert_eq!(
        result.transitions,
        vec![Idle, SessionReady, FixturesReady, Running, Skipped, Cleaned, Reported]
    );
    assert!(!result.diagnostics_captured);
    assert_eq!(h.factory.released(), 1);
}

#[tokio::test]
async fn hung_body_is_cut_off_by_the_test_timeout() {
    let h = Harness::new();
    let case = TestCase::from_fn("hangs", |_ctx| {
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
        .boxed()
    });

    let orchestrator = h.orchestrator().with_test_timeout(Duration::from_millis(50));
    let result = orchestrator.run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    assert!(result.error.as_deref().unwrap().contains("Timed out"));
    assert!(result.duration_ms < 5_000);
    assert_eq!(h.factory.released(), 1);
}

#[tokio::test]
async fn body_sees_timeout_from_wait_engine() {
    let h = Harness::new();
    let case = TestCase::from_fn("waits for nothing", |ctx| {
        async move {
            let locator = taskwright_e2e::Locator::id("does-not-exist");
            ctx.wait().for_visible(ctx.session().driver(), &locator).await?;
            Ok(())
        }
        .boxed()
    });

    let result = h.orchestrator().run(&case).await;

    assert_eq!(result.verdict, Verdict::Failed);
    let error = result.error.unwrap();
    assert!(error.contains("id=does-not-exist to be visible"), "{}", error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_suite_balances_sessions_and_keeps_one_entry_per_test() {
    let h = Harness::new();
    let cases: Vec<TestCase> = (0..8)
        .map(|i| {
            let prefix = format!("LC Suite {}", i);
            TestCase::from_fn(format!("suite case {}", i), move |ctx| {
                async move {
                    ctx.session().goto(&ctx.app().task_page_url).await?;
                    if i % 3 == 0 {
                        return Err(E2eError::AssertionFailed(format!("case {} fails", i)));
                    }
                    Ok(())
                }
                .boxed()
            })
            .with_fixtures(prefix.clone(), vec![TaskFixture::new(format!("{} task", prefix))])
        })
        .collect();

    let runner = SuiteRunner::new(h.orchestrator(), 4);
    let suite = runner.run(cases).await;

    assert_eq!(suite.total, 8);
    assert_eq!(suite.failed, 3);
    assert_eq!(suite.passed, 5);
    assert_eq!(suite.results[5].name, "suite case 5");
    assert_eq!(h.factory.acquired(), 8);
    assert_eq!(h.factory.released(), 8);
    assert_eq!(h.app.task_count(), 0);
    assert_eq!(h.app.screenshots(), 3);

    let json = std::fs::read_to_string(h.report.report_path()).unwrap();
    let doc: ReportDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(doc.entries.len(), 8);
    assert!(doc.entries.iter().all(|e| e.is_finished()));
    for i in 0..8 {
        assert_eq!(doc.entries_named(&format!("suite case {}", i)).count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_prefixes_never_clean_up_under_a_running_test() {
    let h = Harness::new();
    let store = h.app.fixture_store();

    let broad = TestCase::from_fn("broad prefix", |_ctx| async { Ok(()) }.boxed())
        .with_fixtures("Test Task", vec![TaskFixture::new("Test Task A")]);
    let narrow = TestCase::from_fn("narrow prefix", move |_ctx| {
        let store = store.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let own = store.count_by_prefix("Test Task B")?;
            if own != 1 {
                return Err(E2eError::AssertionFailed(format!("own fixture gone: {} rows", own)));
            }
            Ok(())
        }
        .boxed()
    })
    .with_fixtures("Test Task B", vec![TaskFixture::new("Test Task B1")]);

    let suite = SuiteRunner::new(h.orchestrator(), 2).run(vec![broad, narrow]).await;

    assert!(suite.all_passed(), "{:?}", suite.results);
    assert_eq!(suite.results[0].name, "broad prefix");
    assert_eq!(suite.results[1].name, "narrow prefix");
    assert_eq!(h.app.task_count(), 0);
}
