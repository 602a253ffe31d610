//! Template Selection E2E Harness
//!
//! This crate provides a Rust-controlled E2E scenario runner that:
//! - Drives a browser through Playwright via a long-lived Node.js bridge
//! - Runs scenarios built in Rust or parsed from declarative YAML
//! - Treats UI that may legitimately be absent as guarded, optional checks
//! - Optionally spawns the application under test and waits for `/health`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SuiteRunner (Rust)                       │
//! │    ├── bounded workers, one fresh session per scenario      │
//! │    └── run_scenario(scenario, factory) -> ScenarioResult    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario                                                   │
//! │    ├── name, suite, tags, skip                              │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate { path }                              │
//! │          ├── wait_for_network_idle { timeout_ms? }          │
//! │          ├── locate { bind, selectors, policy }             │
//! │          ├── click { target }          (inside if_visible)  │
//! │          ├── assert_visible { target, timeout_ms }          │
//! │          ├── assert_text_visible { pattern, timeout_ms }    │
//! │          ├── checkpoint { label, observe }                  │
//! │          ├── if_visible { target, then: [Step] }            │
//! │          └── optional { step }                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionFactory -> BrowserSession (Playwright | Mock)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod mock;
pub mod playwright;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod server;

pub use driver::{BrowserSession, ElementHandle, LocatorResult, SessionFactory};
pub use error::{E2eError, E2eResult};
pub use report::SuiteReport;
pub use runner::{run_scenario, Outcome, RunnerSettings, ScenarioResult, SuiteRunner};
pub use scenario::{MatchPolicy, Scenario, Step};
pub use selector::{Selector, SelectorSet, TextPattern};
