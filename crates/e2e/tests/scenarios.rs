//! Scenario runner behaviour against the in-memory page

use std::sync::Arc;
use std::time::Duration;

use template_e2e::mock::{MockElement, MockPage, MockSessionFactory};
use template_e2e::{
    run_scenario, Outcome, RunnerSettings, Scenario, SelectorSet, Step, SuiteRunner, TextPattern,
};

fn settings() -> RunnerSettings {
    RunnerSettings {
        base_url: "http://app.test".to_string(),
        navigation_timeout: Duration::from_secs(10),
        network_idle_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(50),
        screenshot_dir: None,
    }
}

fn card() -> MockElement {
    MockElement::new().css(".template-card").text("Blog Post")
}

fn scenario(name: &str, steps: Vec<Step>) -> Scenario {
    Scenario::new("Runner", name, steps)
}

#[tokio::test]
async fn test_false_guard_passes_with_partial_flag() {
    let factory = MockSessionFactory::new(MockPage::new());
    let s = scenario(
        "guard false",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::if_visible("card", vec![Step::click("card")]),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(result.partial);
    assert_eq!(result.guards_skipped, 1);
    assert_eq!(result.interactions, 0);
    assert!(result.failure_reason.is_none());
}

#[tokio::test]
async fn test_hidden_first_match_keeps_guard_closed() {
    let page = MockPage::new().with(card().hidden()).with(card());
    let factory = MockSessionFactory::new(page);
    let log = factory.log();
    let s = scenario(
        "first hidden",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::if_visible("card", vec![Step::click("card")]),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(log.clicks().is_empty());
}

#[tokio::test]
async fn test_required_resolution_failure_fails_despite_guarded_success() {
    let factory = MockSessionFactory::new(MockPage::new().with(card()));
    let s = scenario(
        "required missing",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::if_visible("card", vec![Step::click("card")]),
            Step::locate_required("dropdown", SelectorSet::css(["select#template"])),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("resolution"));
    assert_eq!(result.interactions, 1);
}

#[tokio::test]
async fn test_navigation_error_fails_scenario() {
    let factory = MockSessionFactory::new(MockPage::new().unreachable());
    let log = factory.log();
    let s = scenario("unreachable", vec![Step::navigate("/"), Step::wait_for_network_idle()]);

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("navigation"));
    assert!(result.failure_reason.unwrap().contains("http://app.test/"));
    assert_eq!(log.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_navigation_times_out_as_navigation_error() {
    let factory = MockSessionFactory::new(MockPage::new().hanging());
    let s = scenario("hanging", vec![Step::navigate("/")]);

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("navigation"));
}

#[tokio::test(start_paused = true)]
async fn test_required_network_idle_timeout_fails() {
    let factory = MockSessionFactory::new(MockPage::new().busy_network());
    let s = scenario("busy", vec![Step::navigate("/"), Step::wait_for_network_idle()]);

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_optional_timeout_is_swallowed() {
    let factory = MockSessionFactory::new(MockPage::new().busy_network());
    let s = scenario(
        "busy but optional",
        vec![Step::navigate("/"), Step::wait_for_network_idle().optional()],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(result.soft_failures, 1);
    assert!(result.partial);
}

#[tokio::test(start_paused = true)]
async fn test_required_assert_visible_fails_after_full_timeout() {
    let factory = MockSessionFactory::new(MockPage::new().with(card().hidden()));
    let s = scenario(
        "never visible",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::assert_visible("card", 2000),
        ],
    );

    let started = tokio::time::Instant::now();
    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("timeout"));
    assert!(started.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_assert_visible_succeeds_as_soon_as_element_appears() {
    let page = MockPage::new().with(
        card().reveals(MockElement::new().css("textarea").text("topic")),
    );
    let factory = MockSessionFactory::new(page);
    let s = scenario(
        "reveal",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::locate("inputs", SelectorSet::css(["input[type=\"text\"]", "textarea"])),
            Step::if_visible(
                "card",
                vec![Step::click("card"), Step::assert_visible("inputs", 5000)],
            ),
        ],
    );

    let started = tokio::time::Instant::now();
    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
    assert!(!result.partial);
    assert!(started.elapsed() < Duration::from_millis(5000));
}

#[tokio::test(start_paused = true)]
async fn test_assert_text_visible_is_case_insensitive() {
    let page = MockPage::new().with(MockElement::new().role("button").text("USE TEMPLATE"));
    let factory = MockSessionFactory::new(page);
    let s = scenario(
        "action text",
        vec![
            Step::navigate("/"),
            Step::assert_text_visible(TextPattern::new("generate|create|use template").unwrap(), 1000),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
}

#[tokio::test]
async fn test_unguarded_click_is_rejected_before_opening_a_session() {
    let factory = MockSessionFactory::new(MockPage::new().with(card()));
    let log = factory.log();
    let s = scenario(
        "unguarded",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::click("card"),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("scenario"));
    assert_eq!(log.opened(), 0);
    assert!(log.clicks().is_empty());
}

#[tokio::test]
async fn test_skipped_scenario_opens_no_session() {
    let factory = MockSessionFactory::new(MockPage::new());
    let log = factory.log();
    let s = scenario("later", vec![Step::navigate("/")]).skipped();

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Skipped);
    assert_eq!(log.opened(), 0);
}

#[tokio::test]
async fn test_rerun_is_idempotent_with_fresh_sessions() {
    let page = MockPage::new().with(
        card().reveals(MockElement::new().css("textarea").text("topic")),
    );
    let factory = MockSessionFactory::new(page);
    let log = factory.log();
    let s = scenario(
        "rerun",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::if_visible("card", vec![Step::click("card")]),
            Step::locate_required("inputs", SelectorSet::css(["textarea"])),
        ],
    );

    let first = run_scenario(&s, &factory, &settings()).await;
    let second = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(first.outcome, Outcome::Passed);
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.interactions, second.interactions);
    assert_eq!(log.opened(), 2);
    assert_eq!(log.closed(), 2);
    assert_eq!(log.released(), 2);
}

#[tokio::test]
async fn test_failure_screenshot_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockSessionFactory::new(MockPage::new());
    let s = scenario(
        "missing dropdown",
        vec![
            Step::navigate("/"),
            Step::locate_required("dropdown", SelectorSet::css(["select#template"])),
        ],
    );
    let settings = RunnerSettings {
        screenshot_dir: Some(dir.path().to_path_buf()),
        ..settings()
    };

    let result = run_scenario(&s, &factory, &settings).await;
    assert_eq!(result.outcome, Outcome::Failed);
    let shot = result.screenshot.expect("screenshot path");
    assert!(shot.ends_with("missing-dropdown.png"));
    assert!(shot.exists());
}

#[tokio::test(start_paused = true)]
async fn test_suite_timeout_fails_and_releases_session() {
    let factory = Arc::new(MockSessionFactory::new(MockPage::new().hanging()));
    let log = factory.log();
    let runner = SuiteRunner::new(
        factory,
        RunnerSettings {
            navigation_timeout: Duration::from_secs(600),
            ..settings()
        },
    )
    .with_scenario_timeout(Some(Duration::from_secs(5)));

    let report = runner
        .run("Runner", &[scenario("stuck", vec![Step::navigate("/")])])
        .await;

    let result = report.get("stuck").unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("timeout"));
    assert_eq!(log.opened(), 1);
    assert_eq!(log.closed(), 0);
    assert_eq!(log.released(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_cancelled_suite_skips_unstarted_scenarios() {
    let factory = Arc::new(MockSessionFactory::new(MockPage::new()));
    let log = factory.log();
    let runner = SuiteRunner::new(factory, settings());
    runner.cancellation_token().cancel();

    let report = runner
        .run(
            "Runner",
            &[
                scenario("one", vec![Step::navigate("/")]),
                scenario("two", vec![Step::navigate("/")]),
            ],
        )
        .await;

    assert_eq!(report.skipped, 2);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(log.opened(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_workers_isolate_sessions() {
    let factory = Arc::new(MockSessionFactory::new(MockPage::new().with(card())));
    let log = factory.log();
    let scenarios: Vec<Scenario> = (0..8)
        .map(|i| {
            scenario(
                &format!("parallel {}", i),
                vec![
                    Step::navigate("/"),
                    Step::locate("card", SelectorSet::css([".template-card"])),
                    Step::if_visible("card", vec![Step::click("card")]),
                ],
            )
        })
        .collect();

    let report = SuiteRunner::new(factory, settings())
        .with_workers(4)
        .run("Runner", &scenarios)
        .await;

    assert_eq!(report.passed, 8);
    assert_eq!(log.opened(), 8);
    assert_eq!(log.closed(), 8);
    assert_eq!(log.clicks().len(), 8);
    assert!(report.results.values().all(|r| r.interactions == 1));
}

#[tokio::test]
async fn test_optional_required_locate_leaves_guard_closed() {
    let factory = MockSessionFactory::new(MockPage::new());
    let log = factory.log();
    let s = scenario(
        "optional resolution",
        vec![
            Step::navigate("/"),
            Step::locate_required("card", SelectorSet::css([".template-card"])).optional(),
            Step::if_visible("card", vec![Step::click("card")]),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.failure_reason);
    assert_eq!(result.soft_failures, 1);
    assert_eq!(result.guards_skipped, 1);
    assert!(result.partial);
    assert!(log.clicks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_click_after_reresolution_never_hits_hidden_element() {
    let button = MockElement::new()
        .css(".a")
        .text("BTN")
        .reveals(MockElement::new().css(".new").text("NEW-hidden").hidden())
        .reveals(MockElement::new().css(".new").text("NEW"));
    let factory = MockSessionFactory::new(MockPage::new().with(button));
    let log = factory.log();
    let s = scenario(
        "reresolved click",
        vec![
            Step::navigate("/"),
            Step::locate("target", SelectorSet::css([".new", ".a"])),
            Step::if_visible(
                "target",
                vec![
                    Step::click("target"),
                    Step::assert_visible("target", 1000),
                    Step::click("target"),
                ],
            ),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.failure_kind.as_deref(), Some("contract"));
    assert_eq!(log.clicks(), vec!["BTN".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_polling_hands_back_stale_handles() {
    let factory = MockSessionFactory::new(MockPage::new().with(card().hidden()));
    let log = factory.log();
    let s = scenario(
        "polling",
        vec![
            Step::navigate("/"),
            Step::locate("card", SelectorSet::css([".template-card"])),
            Step::assert_visible("card", 500).optional(),
            Step::assert_text_visible(TextPattern::new("blog post").unwrap(), 500).optional(),
        ],
    );

    let result = run_scenario(&s, &factory, &settings()).await;
    assert_eq!(result.outcome, Outcome::Passed);
    assert_eq!(result.soft_failures, 2);
    // Eleven polls per assertion at 50 ms, one stale handle each.
    assert!(log.disposed() >= 20, "disposed {}", log.disposed());
}
