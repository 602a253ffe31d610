//! Template Selection E2E runner
//!
//! Exit codes: 0 when no scenario failed, 1 when any failed, 2 when the
//! harness itself could not run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use template_e2e::catalog;
use template_e2e::config::{HarnessConfig, ServerSection};
use template_e2e::playwright::{Browser, PlaywrightLauncher};
use template_e2e::server::ServerHandle;
use template_e2e::{Scenario, SuiteRunner};

#[derive(Parser, Debug)]
#[command(name = "template-e2e")]
#[command(about = "E2E scenario runner for the template selection UI")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "e2e.toml")]
    config: PathBuf,

    /// Root URL of the application under test
    #[arg(long, env = "E2E_BASE_URL")]
    base_url: Option<String>,

    /// Directory of YAML scenarios (defaults to the built-in suite)
    #[arg(short, long)]
    scenarios: Option<PathBuf>,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Scenarios to run in parallel
    #[arg(short, long)]
    workers: Option<usize>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Command that starts the application; `{port}` is substituted
    #[arg(long)]
    server_cmd: Option<String>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List scenarios and exit
    #[arg(long)]
    list: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    apply_overrides(&mut config, &cli);
    config.check()?;

    let scenarios = select_scenarios(&config, &cli)?;

    if cli.list {
        for scenario in &scenarios {
            println!("{} :: {} [{}]", scenario.suite, scenario.name, scenario.tags.join(", "));
        }
        return Ok(0);
    }

    if scenarios.is_empty() {
        warn!("No scenarios matched");
        return Ok(0);
    }

    let server = match config.server_config() {
        Some(server_config) => {
            let server = ServerHandle::spawn(server_config).await?;
            config.base_url = server.base_url().to_string();
            Some(server)
        }
        None => None,
    };

    info!("Target: {}", config.base_url);

    let launcher = PlaywrightLauncher::new(config.playwright_config())?;
    let runner = SuiteRunner::new(Arc::new(launcher), config.runner_settings())
        .with_workers(config.workers)
        .with_scenario_timeout(config.scenario_timeout());

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining scenarios");
            cancel.cancel();
        }
    });

    let suite = scenarios
        .first()
        .map(|s| s.suite.clone())
        .unwrap_or_else(|| catalog::SUITE.to_string());
    let report = runner.run(&suite, &scenarios).await;
    report.write_json(&config.output_dir)?;

    if let Some(server) = server {
        server.shutdown().await;
    }
    Ok(report.exit_code())
}

fn apply_overrides(config: &mut HarnessConfig, cli: &Cli) {
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(dir) = &cli.scenarios {
        config.scenarios_dir = Some(dir.clone());
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(browser) = cli.browser {
        config.browser.kind = browser;
    }
    if cli.headed {
        config.browser.headless = false;
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(cmd) = &cli.server_cmd {
        let section = config.server.get_or_insert_with(ServerSection::default);
        section.command = cmd.split_whitespace().map(String::from).collect();
    }
}

fn select_scenarios(config: &HarnessConfig, cli: &Cli) -> anyhow::Result<Vec<Scenario>> {
    let all = match &config.scenarios_dir {
        Some(dir) => Scenario::load_all(dir)
            .with_context(|| format!("loading scenarios from {}", dir.display()))?,
        None => catalog::template_selection_suite()?,
    };

    let selected: Vec<Scenario> = all
        .into_iter()
        .filter(|s| cli.tag.as_ref().map_or(true, |tag| s.tags.contains(tag)))
        .filter(|s| cli.name.as_ref().map_or(true, |name| &s.name == name))
        .collect();

    if let (Some(name), true) = (&cli.name, selected.is_empty()) {
        anyhow::bail!("Scenario not found: {}", name);
    }
    Ok(selected)
}
