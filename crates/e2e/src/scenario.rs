//! Declarative scenario definitions
//!
//! Scenarios are built in Rust (see [`crate::catalog`]) or parsed from YAML
//! files. Both paths go through [`Scenario::validate`] before they run.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::selector::{Selector, SelectorSet, TextPattern};

/// Default bound for visibility polling
pub const DEFAULT_ASSERT_TIMEOUT_MS: u64 = 5000;

/// A named end-to-end test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name within its suite
    pub name: String,

    /// Suite this scenario belongs to
    #[serde(default = "default_suite")]
    pub suite: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Report as skipped without opening a session
    #[serde(default)]
    pub skip: bool,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

fn default_suite() -> String {
    "default".to_string()
}

/// A single step in a scenario.
///
/// Steps are required unless wrapped in [`Step::Optional`] or nested in an
/// [`Step::IfVisible`] branch whose guard turned out false.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a path relative to the base URL, or to an absolute URL
    Navigate { path: String },

    /// Wait until the page has no in-flight network requests
    WaitForNetworkIdle {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Resolve a selector set now and bind the result under `bind`
    Locate {
        bind: String,
        selectors: SelectorSet,
        #[serde(default)]
        policy: MatchPolicy,
    },

    /// Click the first match of a bound locator
    Click { target: String },

    /// Poll until any match of a bound locator is visible
    AssertVisible {
        target: String,
        #[serde(default = "default_assert_timeout")]
        timeout_ms: u64,
    },

    /// Poll until visible text matches the pattern
    AssertTextVisible {
        pattern: TextPattern,
        #[serde(default = "default_assert_timeout")]
        timeout_ms: u64,
    },

    /// "Page loaded" checkpoint. Always passes; logs how many matches each
    /// observed binding has.
    Checkpoint {
        label: String,
        #[serde(default)]
        observe: Vec<String>,
    },

    /// Run `then` only if the first match of `target` is visible
    IfVisible { target: String, then: Vec<Step> },

    /// Soft assertion: a timeout or empty resolution is recorded, not fatal
    Optional { step: Box<Step> },
}

fn default_assert_timeout() -> u64 {
    DEFAULT_ASSERT_TIMEOUT_MS
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Zero matches is a valid result
    #[default]
    Any,
    /// Zero matches fails the step
    AtLeastOne,
}

impl Step {
    pub fn navigate(path: impl Into<String>) -> Self {
        Step::Navigate { path: path.into() }
    }

    pub fn wait_for_network_idle() -> Self {
        Step::WaitForNetworkIdle { timeout_ms: None }
    }

    pub fn locate(bind: impl Into<String>, selectors: SelectorSet) -> Self {
        Step::Locate {
            bind: bind.into(),
            selectors,
            policy: MatchPolicy::Any,
        }
    }

    pub fn locate_required(bind: impl Into<String>, selectors: SelectorSet) -> Self {
        Step::Locate {
            bind: bind.into(),
            selectors,
            policy: MatchPolicy::AtLeastOne,
        }
    }

    pub fn click(target: impl Into<String>) -> Self {
        Step::Click { target: target.into() }
    }

    pub fn assert_visible(target: impl Into<String>, timeout_ms: u64) -> Self {
        Step::AssertVisible {
            target: target.into(),
            timeout_ms,
        }
    }

    pub fn assert_text_visible(pattern: TextPattern, timeout_ms: u64) -> Self {
        Step::AssertTextVisible { pattern, timeout_ms }
    }

    pub fn checkpoint(label: impl Into<String>, observe: &[&str]) -> Self {
        Step::Checkpoint {
            label: label.into(),
            observe: observe.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn if_visible(target: impl Into<String>, then: Vec<Step>) -> Self {
        Step::IfVisible {
            target: target.into(),
            then,
        }
    }

    /// Wrap this step as a soft assertion
    pub fn optional(self) -> Self {
        Step::Optional { step: Box::new(self) }
    }

    /// Short label used in logs
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { path } => format!("navigate:{}", path),
            Step::WaitForNetworkIdle { .. } => "wait_for_network_idle".to_string(),
            Step::Locate { bind, .. } => format!("locate:{}", bind),
            Step::Click { target } => format!("click:{}", target),
            Step::AssertVisible { target, .. } => format!("assert_visible:{}", target),
            Step::AssertTextVisible { pattern, .. } => format!("assert_text_visible:{}", pattern),
            Step::Checkpoint { label, .. } => format!("checkpoint:{}", label),
            Step::IfVisible { target, .. } => format!("if_visible:{}", target),
            Step::Optional { step } => format!("optional:{}", step.name()),
        }
    }
}

impl Scenario {
    pub fn new(suite: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            suite: suite.into(),
            description: String::new(),
            tags: Vec::new(),
            skip: false,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Parse and validate a scenario from YAML
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            E2eError::ScenarioParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load all scenarios from `.yaml`/`.yml` files under a directory,
    /// in path order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        ensure_unique_names(&scenarios)?;
        Ok(scenarios)
    }

    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Check bindings and the click-behind-guard contract.
    ///
    /// Every `Click` must sit inside an `IfVisible` on the same binding, with
    /// no re-binding of that name in between.
    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".into()));
        }
        let mut scope = Scope::default();
        validate_steps(&self.name, &self.steps, &mut scope)
    }
}

/// Reject duplicate scenario names; reports are keyed by name
pub fn ensure_unique_names(scenarios: &[Scenario]) -> E2eResult<()> {
    let mut seen = HashSet::new();
    for scenario in scenarios {
        if !seen.insert(scenario.name.as_str()) {
            return Err(E2eError::ScenarioParse(format!(
                "duplicate scenario name '{}'",
                scenario.name
            )));
        }
    }
    Ok(())
}

#[derive(Default, Clone)]
struct Scope {
    /// binding name -> verified visible by an enclosing guard
    bindings: HashMap<String, bool>,
}

fn validate_steps(scenario: &str, steps: &[Step], scope: &mut Scope) -> E2eResult<()> {
    for step in steps {
        validate_step(scenario, step, scope)?;
    }
    Ok(())
}

fn validate_step(scenario: &str, step: &Step, scope: &mut Scope) -> E2eResult<()> {
    let invalid = |msg: String| E2eError::ScenarioParse(format!("{}: {}", scenario, msg));

    match step {
        Step::Navigate { path } if path.is_empty() => Err(invalid("navigate path is empty".into())),
        Step::Navigate { .. } => {
            // Handles from the previous document are gone.
            scope.bindings.clear();
            Ok(())
        }
        Step::WaitForNetworkIdle { .. } => Ok(()),
        Step::AssertTextVisible { pattern, .. } => pattern
            .regex()
            .map(|_| ())
            .map_err(|e| invalid(format!("text pattern {}: {}", pattern, e))),
        Step::Locate { bind, selectors, .. } => {
            if selectors.is_empty() {
                return Err(invalid(format!("locate '{}' has no selectors", bind)));
            }
            for selector in selectors.strategies() {
                if let Selector::Text(pattern) = selector {
                    pattern
                        .regex()
                        .map_err(|e| invalid(format!("locate '{}' {}: {}", bind, pattern, e)))?;
                }
            }
            scope.bindings.insert(bind.clone(), false);
            Ok(())
        }
        Step::Click { target } => match scope.bindings.get(target) {
            Some(true) => Ok(()),
            Some(false) => Err(invalid(format!(
                "click on '{}' is not guarded by if_visible",
                target
            ))),
            None => Err(invalid(format!("click on unbound locator '{}'", target))),
        },
        Step::AssertVisible { target, .. } | Step::IfVisible { target, .. }
            if !scope.bindings.contains_key(target) =>
        {
            Err(invalid(format!("unbound locator '{}'", target)))
        }
        Step::AssertVisible { .. } => Ok(()),
        Step::Checkpoint { observe, .. } => match observe.iter().find(|b| !scope.bindings.contains_key(*b)) {
            Some(missing) => Err(invalid(format!("checkpoint observes unbound locator '{}'", missing))),
            None => Ok(()),
        },
        Step::IfVisible { target, then } => {
            // Bindings made inside the branch do not leak out of it.
            let mut inner = scope.clone();
            inner.bindings.insert(target.clone(), true);
            validate_steps(scenario, then, &mut inner)
        }
        Step::Optional { step } => match step.as_ref() {
            Step::WaitForNetworkIdle { .. }
            | Step::Locate { .. }
            | Step::AssertVisible { .. }
            | Step::AssertTextVisible { .. } => validate_step(scenario, step, scope),
            other => Err(invalid(format!(
                "'{}' cannot be optional; only waits, locates and assertions can",
                other.name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    #[test]
    fn test_parse_guarded_scenario() {
        let yaml = r#"
name: shows variable input fields when template selected
suite: Template Selection
tags:
  - templates
steps:
  - action: navigate
    path: /
  - action: wait_for_network_idle
  - action: locate
    bind: card
    selectors:
      - by: test_id
        id: template-card
      - by: css
        css: .template-card
  - action: if_visible
    target: card
    then:
      - action: click
        target: card
      - action: locate
        bind: inputs
        selectors:
          - by: css
            css: input[type="text"], textarea
      - action: optional
        step:
          action: assert_visible
          target: inputs
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.suite, "Template Selection");
        assert_eq!(scenario.steps.len(), 4);
        match &scenario.steps[3] {
            Step::IfVisible { then, .. } => match &then[2] {
                Step::Optional { step } => match step.as_ref() {
                    Step::AssertVisible { timeout_ms, .. } => {
                        assert_eq!(*timeout_ms, DEFAULT_ASSERT_TIMEOUT_MS)
                    }
                    other => panic!("unexpected step {:?}", other),
                },
                other => panic!("unexpected step {:?}", other),
            },
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unguarded_click_rejected() {
        let scenario = Scenario::new(
            "s",
            "unguarded",
            vec![
                Step::locate("card", SelectorSet::css([".template-card"])),
                Step::click("card"),
            ],
        );
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("not guarded"));
    }

    #[test]
    fn test_rebinding_inside_guard_drops_verification() {
        let scenario = Scenario::new(
            "s",
            "rebind",
            vec![
                Step::locate("card", SelectorSet::css([".template-card"])),
                Step::if_visible(
                    "card",
                    vec![
                        Step::locate("card", SelectorSet::css(["[data-testid=\"template-card\"]"])),
                        Step::click("card"),
                    ],
                ),
            ],
        );
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_branch_bindings_do_not_leak() {
        let scenario = Scenario::new(
            "s",
            "leak",
            vec![
                Step::locate("card", SelectorSet::css([".template-card"])),
                Step::if_visible(
                    "card",
                    vec![Step::locate("inputs", SelectorSet::css(["textarea"]))],
                ),
                Step::assert_visible("inputs", 100),
            ],
        );
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_invalid_text_patterns_rejected_at_load() {
        let assertion = r#"
name: bad assertion pattern
steps:
  - action: navigate
    path: /
  - action: assert_text_visible
    pattern:
      source: "(unclosed"
"#;
        let err = Scenario::from_yaml(assertion).unwrap_err();
        assert_eq!(err.kind(), "scenario");

        let selector = r#"
name: bad selector pattern
steps:
  - action: navigate
    path: /
  - action: optional
    step:
      action: locate
      bind: action
      selectors:
        - by: text
          source: "generate|("
"#;
        let err = Scenario::from_yaml(selector).unwrap_err();
        assert!(err.to_string().contains("locate 'action'"));
    }

    #[test]
    fn test_navigation_drops_bindings() {
        let scenario = Scenario::new(
            "s",
            "stale",
            vec![
                Step::navigate("/"),
                Step::locate("card", SelectorSet::css([".template-card"])),
                Step::navigate("/templates"),
                Step::assert_visible("card", 100),
            ],
        );
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("unbound locator 'card'"));
    }

    #[test]
    fn test_optional_navigation_rejected() {
        let scenario = Scenario::new("s", "soft-nav", vec![Step::navigate("/").optional()]);
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_guarded_click_accepted() {
        let scenario = Scenario::new(
            "s",
            "guarded",
            vec![
                Step::navigate("/"),
                Step::locate("social", Selector::css("button:has-text(\"Social\")").into()),
                Step::if_visible("social", vec![Step::click("social")]),
                Step::checkpoint("page loaded", &["social"]),
            ],
        );
        scenario.validate().unwrap();
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = Scenario::new("s", "same", vec![Step::navigate("/")]);
        let b = a.clone();
        assert!(ensure_unique_names(&[a, b]).is_err());
    }
}
