//! Scenario execution against live browser sessions
//!
//! [`run_scenario`] drives one scenario through one fresh session.
//! [`SuiteRunner`] fans scenarios out over a bounded number of workers and
//! collects a [`SuiteReport`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::{BrowserSession, LocatorResult, SessionFactory};
use crate::error::{E2eError, E2eResult};
use crate::report::SuiteReport;
use crate::scenario::{MatchPolicy, Scenario, Step};
use crate::selector::{Selector, SelectorSet, TextPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub suite: String,
    pub outcome: Outcome,
    pub failure_reason: Option<String>,
    pub failure_kind: Option<String>,
    /// Some guard was false or some optional step gave up
    pub partial: bool,
    pub steps_executed: usize,
    pub interactions: usize,
    pub guards_skipped: usize,
    pub soft_failures: usize,
    pub duration_ms: u64,
    pub screenshot: Option<PathBuf>,
}

impl ScenarioResult {
    fn skipped(scenario: &Scenario, reason: Option<String>) -> Self {
        Self {
            name: scenario.name.clone(),
            suite: scenario.suite.clone(),
            outcome: Outcome::Skipped,
            failure_reason: reason,
            failure_kind: None,
            partial: false,
            steps_executed: 0,
            interactions: 0,
            guards_skipped: 0,
            soft_failures: 0,
            duration_ms: 0,
            screenshot: None,
        }
    }

    fn failed(scenario: &Scenario, error: &E2eError, duration_ms: u64) -> Self {
        Self {
            outcome: Outcome::Failed,
            failure_reason: Some(error.to_string()),
            failure_kind: Some(error.kind().to_string()),
            duration_ms,
            ..Self::skipped(scenario, None)
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Timing and location settings shared by every scenario of a run
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub base_url: String,
    pub navigation_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub poll_interval: Duration,
    /// Where to put a screenshot of a failing session
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            navigation_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            screenshot_dir: None,
        }
    }
}

impl RunnerSettings {
    /// Resolve a step path against the base URL
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// Run one scenario in a fresh session from `factory`.
///
/// The session is closed on every normal exit. If this future is dropped
/// early the session is released by its `Drop`.
pub async fn run_scenario(
    scenario: &Scenario,
    factory: &dyn SessionFactory,
    settings: &RunnerSettings,
) -> ScenarioResult {
    if scenario.skip {
        debug!("Scenario '{}' is marked skip", scenario.name);
        return ScenarioResult::skipped(scenario, None);
    }

    let start = Instant::now();
    debug!("Running scenario: {}", scenario.name);

    if let Err(e) = scenario.validate() {
        return ScenarioResult::failed(scenario, &e, 0);
    }

    let mut session = match factory.open().await {
        Ok(session) => session,
        Err(e) => {
            error!("Could not open session for '{}': {}", scenario.name, e);
            return ScenarioResult::failed(scenario, &e, start.elapsed().as_millis() as u64);
        }
    };

    let mut execution = Execution::new(session.as_mut(), settings);
    let outcome = execution.run(&scenario.steps).await;
    let stats = execution.stats;

    let mut screenshot = None;
    if let (Err(e), Some(dir)) = (&outcome, &settings.screenshot_dir) {
        let path = dir.join(format!("{}.png", sanitize(&scenario.name)));
        match session.screenshot(&path).await {
            Ok(true) => screenshot = Some(path),
            Ok(false) => {}
            Err(shot_err) => warn!("Screenshot after '{}' failed: {}", e, shot_err),
        }
    }

    if let Err(e) = session.close().await {
        warn!("Closing session for '{}' failed: {}", scenario.name, e);
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    let mut result = match &outcome {
        Ok(()) => ScenarioResult {
            outcome: Outcome::Passed,
            duration_ms,
            ..ScenarioResult::skipped(scenario, None)
        },
        Err(e) => ScenarioResult::failed(scenario, e, duration_ms),
    };
    result.steps_executed = stats.steps_executed;
    result.interactions = stats.interactions;
    result.guards_skipped = stats.guards_skipped;
    result.soft_failures = stats.soft_failures;
    result.partial = stats.guards_skipped > 0 || stats.soft_failures > 0;
    result.screenshot = screenshot;
    result
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    steps_executed: usize,
    interactions: usize,
    guards_skipped: usize,
    soft_failures: usize,
}

struct Binding {
    result: LocatorResult,
    /// First match confirmed visible by an enclosing guard
    verified: bool,
}

struct Execution<'a> {
    session: &'a mut dyn BrowserSession,
    settings: &'a RunnerSettings,
    bindings: HashMap<String, Binding>,
    stats: Stats,
}

impl<'a> Execution<'a> {
    fn new(session: &'a mut dyn BrowserSession, settings: &'a RunnerSettings) -> Self {
        Self {
            session,
            settings,
            bindings: HashMap::new(),
            stats: Stats::default(),
        }
    }

    fn run<'s>(&'s mut self, steps: &'s [Step]) -> BoxFuture<'s, E2eResult<()>> {
        async move {
            for step in steps {
                self.step(step).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn step<'s>(&'s mut self, step: &'s Step) -> BoxFuture<'s, E2eResult<()>> {
        async move {
            debug!("Executing step: {}", step.name());
            self.stats.steps_executed += 1;

            match step {
                Step::Navigate { path } => self.navigate(path).await,
                Step::WaitForNetworkIdle { timeout_ms } => {
                    let bound = timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(self.settings.network_idle_timeout);
                    self.wait_for_network_idle(bound).await
                }
                Step::Locate { bind, selectors, policy } => {
                    let result = self.session.locate(selectors).await?;
                    if *policy == MatchPolicy::AtLeastOne && result.is_empty() {
                        return Err(E2eError::Resolution(format!("{} ({})", bind, selectors)));
                    }
                    debug!("{} resolved to {} element(s)", bind, result.len());
                    self.bind(bind, result).await
                }
                Step::Click { target } => {
                    let binding = self.binding(target)?;
                    let element = match (binding.verified, binding.result.first()) {
                        (true, Some(element)) => Some(element.clone()),
                        _ => None,
                    };
                    // The binding may have been re-resolved since its guard ran.
                    let visible = match &element {
                        Some(element) => self.session.is_visible(element).await?,
                        None => false,
                    };
                    let element = match element {
                        Some(element) if visible => element,
                        _ => {
                            return Err(E2eError::ContractViolation(format!(
                                "click on '{}' without a visible first match",
                                target
                            )))
                        }
                    };
                    self.session.click(&element).await?;
                    self.stats.interactions += 1;
                    Ok(())
                }
                Step::AssertVisible { target, timeout_ms } => {
                    let selectors = self.binding(target)?.result.selectors().clone();
                    self.assert_visible(target, &selectors, Duration::from_millis(*timeout_ms))
                        .await
                }
                Step::AssertTextVisible { pattern, timeout_ms } => {
                    self.assert_text_visible(pattern, Duration::from_millis(*timeout_ms))
                        .await
                }
                Step::Checkpoint { label, observe } => {
                    let counts: Vec<String> = observe
                        .iter()
                        .map(|name| {
                            let count = self.bindings.get(name).map(|b| b.result.len()).unwrap_or(0);
                            format!("{}={}", name, count)
                        })
                        .collect();
                    info!("Checkpoint '{}' reached [{}]", label, counts.join(", "));
                    Ok(())
                }
                Step::IfVisible { target, then } => {
                    let result = self.binding(target)?.result.clone();
                    let visible = result.first_visible(&mut *self.session).await?;
                    if !visible {
                        debug!("Guard on '{}' is false, skipping {} step(s)", target, then.len());
                        self.stats.guards_skipped += 1;
                        return Ok(());
                    }
                    if let Some(binding) = self.bindings.get_mut(target) {
                        binding.verified = true;
                    }
                    self.run(then).await
                }
                Step::Optional { step } => match self.step(step).await {
                    Err(e) if e.is_soft() => {
                        debug!("Optional step {} gave up: {}", step.name(), e);
                        self.stats.soft_failures += 1;
                        if let Step::Locate { bind, selectors, .. } = step.as_ref() {
                            // Later guards on this name read false instead of unbound.
                            self.bind(bind, LocatorResult::empty(selectors.clone())).await?;
                        }
                        Ok(())
                    }
                    other => other,
                },
            }
        }
        .boxed()
    }

    /// Replace a binding, handing the old element handles back to the driver
    async fn bind(&mut self, name: &str, result: LocatorResult) -> E2eResult<()> {
        let binding = Binding {
            result,
            verified: false,
        };
        if let Some(old) = self.bindings.insert(name.to_string(), binding) {
            self.session.dispose(old.result.elements()).await?;
        }
        Ok(())
    }

    fn binding(&self, name: &str) -> E2eResult<&Binding> {
        self.bindings.get(name).ok_or_else(|| {
            E2eError::ContractViolation(format!("locator '{}' used before it was bound", name))
        })
    }

    async fn navigate(&mut self, path: &str) -> E2eResult<()> {
        let url = self.settings.url_for(path);
        let bound = self.settings.navigation_timeout;
        match tokio::time::timeout(bound, self.session.navigate(&url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(E2eError::Navigation(format!(
                    "{} did not respond within {} ms",
                    url,
                    bound.as_millis()
                )))
            }
        }
        // Old handles belong to the previous document.
        self.bindings.clear();
        Ok(())
    }

    async fn wait_for_network_idle(&mut self, bound: Duration) -> E2eResult<()> {
        // Small grace period so the driver can report its own timeout first.
        let outer = bound + Duration::from_millis(500);
        match tokio::time::timeout(outer, self.session.wait_for_network_idle(bound)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::Timeout(format!(
                "network idle after {} ms",
                bound.as_millis()
            ))),
        }
    }

    /// Re-resolves `selectors` on every poll; succeeds on the first visible match
    async fn assert_visible(
        &mut self,
        target: &str,
        selectors: &SelectorSet,
        bound: Duration,
    ) -> E2eResult<()> {
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let result = self.session.locate(selectors).await?;
            let visible = result.any_visible(&mut *self.session).await?;
            let replaced = match self.bindings.get_mut(target) {
                Some(binding) => {
                    // A new first match has not been seen by the guard.
                    if binding.result.first() != result.first() {
                        binding.verified = false;
                    }
                    std::mem::replace(&mut binding.result, result)
                }
                None => result,
            };
            self.session.dispose(replaced.elements()).await?;
            if visible {
                return Ok(());
            }
            if !self.pause_until(deadline).await {
                return Err(E2eError::Timeout(format!(
                    "'{}' to be visible ({}) within {} ms",
                    target,
                    selectors,
                    bound.as_millis()
                )));
            }
        }
    }

    async fn assert_text_visible(&mut self, pattern: &TextPattern, bound: Duration) -> E2eResult<()> {
        let selector = Selector::text(pattern.clone());
        let regex = pattern.regex()?;
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            let found = self.session.query(&selector).await?;
            let mut matched = false;
            for element in &found {
                if self.session.is_visible(element).await?
                    && regex.is_match(&self.session.visible_text(element).await?)
                {
                    matched = true;
                    break;
                }
            }
            self.session.dispose(&found).await?;
            if matched {
                return Ok(());
            }
            if !self.pause_until(deadline).await {
                return Err(E2eError::Timeout(format!(
                    "text {} to be visible within {} ms",
                    pattern,
                    bound.as_millis()
                )));
            }
        }
    }

    /// Sleep one poll interval, clamped to the deadline. Returns `false`
    /// once the deadline has already passed.
    async fn pause_until(&mut self, deadline: tokio::time::Instant) -> bool {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let wait = self.settings.poll_interval.min(deadline - now);
        tokio::time::sleep(wait).await;
        true
    }
}

/// Runs many scenarios with bounded parallelism
pub struct SuiteRunner {
    factory: Arc<dyn SessionFactory>,
    settings: Arc<RunnerSettings>,
    workers: usize,
    scenario_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl SuiteRunner {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: RunnerSettings) -> Self {
        Self {
            factory,
            settings: Arc::new(settings),
            workers: 1,
            scenario_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_scenario_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scenario_timeout = timeout;
        self
    }

    /// Token that stops the suite when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, suite: &str, scenarios: &[Scenario]) -> SuiteReport {
        let start = Instant::now();
        let started_at = chrono::Utc::now();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        info!("Running {} scenario(s) with {} worker(s)...", scenarios.len(), self.workers);

        for scenario in scenarios.iter().cloned() {
            let factory = self.factory.clone();
            let settings = self.settings.clone();
            let permits = permits.clone();
            let cancel = self.cancel.clone();
            let scenario_timeout = self.scenario_timeout;

            tasks.spawn(async move {
                let guarded = AssertUnwindSafe(run_isolated(
                    &scenario,
                    factory.as_ref(),
                    &settings,
                    &permits,
                    &cancel,
                    scenario_timeout,
                ))
                .catch_unwind()
                .await;

                guarded.unwrap_or_else(|_| {
                    let e = E2eError::ContractViolation("scenario task panicked".into());
                    ScenarioResult::failed(&scenario, &e, 0)
                })
            });
        }

        let mut results = Vec::with_capacity(scenarios.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    log_result(&result);
                    results.push(result);
                }
                Err(e) => error!("Scenario task aborted: {}", e),
            }
        }

        let report = SuiteReport::new(suite, started_at, start.elapsed(), results);
        info!(
            "Results: {} passed, {} failed, {} skipped ({} ms)",
            report.passed, report.failed, report.skipped, report.duration_ms
        );
        report
    }
}

async fn run_isolated(
    scenario: &Scenario,
    factory: &dyn SessionFactory,
    settings: &RunnerSettings,
    permits: &Semaphore,
    cancel: &CancellationToken,
    scenario_timeout: Option<Duration>,
) -> ScenarioResult {
    let _permit = tokio::select! {
        permit = permits.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return ScenarioResult::skipped(scenario, Some("worker pool closed".into())),
        },
        _ = cancel.cancelled() => {
            return ScenarioResult::skipped(scenario, Some("suite cancelled before start".into()));
        }
    };
    if cancel.is_cancelled() {
        return ScenarioResult::skipped(scenario, Some("suite cancelled before start".into()));
    }

    let start = Instant::now();
    let run = run_scenario(scenario, factory, settings);
    let bounded = async {
        match scenario_timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                E2eError::Timeout(format!("scenario exceeded {} ms", limit.as_millis()))
            }),
            None => Ok(run.await),
        }
    };

    tokio::select! {
        result = bounded => match result {
            Ok(result) => result,
            Err(e) => ScenarioResult::failed(scenario, &e, start.elapsed().as_millis() as u64),
        },
        _ = cancel.cancelled() => {
            let e = E2eError::Cancelled("suite cancelled".into());
            ScenarioResult::failed(scenario, &e, start.elapsed().as_millis() as u64)
        }
    }
}

fn log_result(result: &ScenarioResult) {
    match result.outcome {
        Outcome::Passed if result.partial => info!(
            "✓ {} ({} ms, {} guard(s) skipped, {} soft failure(s))",
            result.name, result.duration_ms, result.guards_skipped, result.soft_failures
        ),
        Outcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
        Outcome::Skipped => info!("- {} (skipped)", result.name),
        Outcome::Failed => error!(
            "✗ {} - {}",
            result.name,
            result.failure_reason.as_deref().unwrap_or("unknown error")
        ),
    }
}
