//! Suite report and exit-code derivation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::E2eResult;
use crate::runner::{Outcome, ScenarioResult};

/// Outcome of every scenario in one run, keyed by scenario name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: BTreeMap<String, ScenarioResult>,
}

impl SuiteReport {
    pub fn new(
        suite: impl Into<String>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let passed = count(Outcome::Passed);
        let failed = count(Outcome::Failed);
        let skipped = count(Outcome::Skipped);

        Self {
            suite: suite.into(),
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            total: results.len(),
            passed,
            failed,
            skipped,
            results: results.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, scenario: &str) -> Option<&ScenarioResult> {
        self.results.get(scenario)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Non-zero iff any scenario failed
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Write `test-results.json` into `output_dir`
    pub fn write_json(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: Outcome) -> ScenarioResult {
        ScenarioResult {
            name: name.to_string(),
            suite: "Template Selection".to_string(),
            outcome,
            failure_reason: (outcome == Outcome::Failed).then(|| "Timeout waiting for: x".to_string()),
            failure_kind: (outcome == Outcome::Failed).then(|| "timeout".to_string()),
            partial: false,
            steps_executed: 3,
            interactions: 0,
            guards_skipped: 0,
            soft_failures: 0,
            duration_ms: 12,
            screenshot: None,
        }
    }

    #[test]
    fn test_exit_code_zero_without_failures() {
        let report = SuiteReport::new(
            "Template Selection",
            Utc::now(),
            Duration::from_millis(30),
            vec![result("a", Outcome::Passed), result("b", Outcome::Skipped)],
        );
        assert_eq!(report.total, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_exit_code_non_zero_with_failure() {
        let report = SuiteReport::new(
            "Template Selection",
            Utc::now(),
            Duration::from_millis(30),
            vec![result("a", Outcome::Passed), result("b", Outcome::Failed)],
        );
        assert!(report.has_failures());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.get("b").unwrap().failure_kind.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = SuiteReport::new(
            "Template Selection",
            Utc::now(),
            Duration::from_millis(5),
            vec![result("displays template list", Outcome::Passed)],
        );
        let path = report.write_json(dir.path()).unwrap();
        let parsed: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.passed, 1);
        assert!(parsed.get("displays template list").is_some());
    }
}
