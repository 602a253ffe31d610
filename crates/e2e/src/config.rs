//! Harness configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::playwright::{Browser, PlaywrightConfig};
use crate::runner::RunnerSettings;
use crate::server::ServerConfig;

/// Harness configuration, usually read from `e2e.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root URL of the application under test
    pub base_url: String,

    /// Scenarios running at the same time
    pub workers: usize,

    /// Directory of YAML scenarios; the built-in suite is used when unset
    pub scenarios_dir: Option<PathBuf>,

    /// Output directory for results and failure screenshots
    pub output_dir: PathBuf,

    pub screenshots_on_failure: bool,

    pub timeouts: TimeoutConfig,

    pub browser: BrowserConfig,

    /// Launch the application before running scenarios
    pub server: Option<ServerSection>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            workers: 1,
            scenarios_dir: None,
            output_dir: PathBuf::from("test-results"),
            screenshots_on_failure: true,
            timeouts: TimeoutConfig::default(),
            browser: BrowserConfig::default(),
            server: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    pub network_idle_ms: u64,
    pub poll_interval_ms: u64,
    /// Whole-scenario bound; unbounded when unset
    pub scenario_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            network_idle_ms: 30_000,
            poll_interval_ms: 100,
            scenario_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub node_binary: PathBuf,
    pub node_path: Option<PathBuf>,
    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: PathBuf::from("node"),
            node_path: None,
            launch_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub command: Vec<String>,
    pub port: Option<u16>,
    pub health_path: String,
    pub startup_timeout_ms: u64,
    pub env: BTreeMap<String, String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            port: None,
            health_path: "/health".to_string(),
            startup_timeout_ms: 30_000,
            env: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.check()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn check(&self) -> E2eResult<()> {
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if let Some(server) = &self.server {
            if server.command.is_empty() {
                return Err(E2eError::Config("[server] command is empty".into()));
            }
        }
        Ok(())
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            base_url: self.base_url.clone(),
            navigation_timeout: Duration::from_millis(self.timeouts.navigation_ms),
            network_idle_timeout: Duration::from_millis(self.timeouts.network_idle_ms),
            poll_interval: Duration::from_millis(self.timeouts.poll_interval_ms.max(1)),
            screenshot_dir: self
                .screenshots_on_failure
                .then(|| self.output_dir.join("screenshots")),
        }
    }

    pub fn scenario_timeout(&self) -> Option<Duration> {
        self.timeouts.scenario_ms.map(Duration::from_millis)
    }

    pub fn playwright_config(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            browser: self.browser.kind,
            headless: self.browser.headless,
            viewport_width: self.browser.viewport_width,
            viewport_height: self.browser.viewport_height,
            node_binary: self.browser.node_binary.clone(),
            node_path: self.browser.node_path.clone(),
            launch_timeout: Duration::from_millis(self.browser.launch_timeout_ms),
            request_timeout: Duration::from_millis(self.browser.request_timeout_ms),
        }
    }

    pub fn server_config(&self) -> Option<ServerConfig> {
        self.server.as_ref().map(|server| ServerConfig {
            command: server.command.clone(),
            port: server.port,
            health_path: server.health_path.clone(),
            startup_timeout: Duration::from_millis(server.startup_timeout_ms),
            env: server.env.clone(),
            ..ServerConfig::default()
        })
    }
}
