//! Error types for E2E scenarios

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("No element matched: {0}")]
    Resolution(String),

    #[error("Scenario contract violated: {0}")]
    ContractViolation(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright bridge error: {0}")]
    Bridge(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Invalid text pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Stable short name recorded in scenario results.
    pub fn kind(&self) -> &'static str {
        match self {
            E2eError::Navigation(_) => "navigation",
            E2eError::Timeout(_) => "timeout",
            E2eError::Resolution(_) => "resolution",
            E2eError::ContractViolation(_) => "contract",
            E2eError::Cancelled(_) => "cancelled",
            E2eError::ServerStartup(_) | E2eError::ServerHealthCheck(_) => "server",
            E2eError::PlaywrightNotFound | E2eError::Bridge(_) => "driver",
            E2eError::ScenarioParse(_) | E2eError::Pattern(_) | E2eError::Yaml(_) => "scenario",
            E2eError::Config(_) | E2eError::Toml(_) => "config",
            E2eError::Io(_) | E2eError::Json(_) | E2eError::Http(_) => "io",
        }
    }

    /// Errors an optional step is allowed to absorb.
    pub fn is_soft(&self) -> bool {
        matches!(self, E2eError::Timeout(_) | E2eError::Resolution(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
