//! Application launcher
//!
//! Starts the app under test on a free port, forwards its output to tracing
//! and blocks until `{base_url}{health_path}` answers 2xx.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for spawning the application under test
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Program and arguments; `{port}` is replaced with the chosen port
    pub command: Vec<String>,

    pub host: String,

    /// Fixed port, or a free one when unset
    pub port: Option<u16>,

    pub health_path: String,

    pub startup_timeout: Duration,

    /// Extra environment for the application
    pub env: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: None,
            health_path: "/health".to_string(),
            startup_timeout: Duration::from_secs(30),
            env: BTreeMap::new(),
        }
    }
}

/// A running application. The process is killed if the handle is dropped
/// without [`ServerHandle::shutdown`].
pub struct ServerHandle {
    child: Child,
    base_url: String,
    port: u16,
}

impl ServerHandle {
    pub async fn spawn(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://{}:{}", config.host, port);

        let port_str = port.to_string();
        let argv: Vec<String> = config
            .command
            .iter()
            .map(|arg| arg.replace("{port}", &port_str))
            .collect();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| E2eError::ServerStartup("server command is empty".into()))?;

        info!("Starting application on port {}: {}", port, argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .env("PORT", &port_str)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::ServerStartup(format!("{}: {}", program, e)))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr));
        }

        let mut handle = ServerHandle {
            child,
            base_url,
            port,
        };

        let ready = wait_for_healthy(&handle.base_url, &config.health_path, config.startup_timeout);
        tokio::select! {
            ready = ready => ready?,
            status = handle.child.wait() => {
                let status = status?;
                return Err(E2eError::ServerStartup(format!(
                    "application exited before becoming healthy ({})",
                    status
                )));
            }
        }

        info!("Application is healthy at {}", handle.base_url);
        Ok(handle)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// SIGTERM, then kill once the grace period runs out
    pub async fn shutdown(mut self) {
        info!("Stopping application (pid: {:?})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!("SIGTERM to {} failed: {}", pid, e);
                }
            }
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Application exited with {}", status),
            Ok(Err(e)) => warn!("Waiting for application failed: {}", e),
            Err(_) => {
                warn!("Application ignored SIGTERM, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Killing application failed: {}", e);
                }
            }
        }
    }
}

async fn forward_output<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "app", "{}", line);
    }
}

/// Poll `{base_url}{health_path}` until it returns 2xx or `limit` elapses
pub async fn wait_for_healthy(base_url: &str, health_path: &str, limit: Duration) -> E2eResult<()> {
    let health_url = format!("{}{}", base_url.trim_end_matches('/'), health_path);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let deadline = Instant::now() + limit;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match client.get(&health_url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => debug!("{} answered {}", health_url, resp.status()),
            // Refused connections are normal while the app boots.
            Err(e) if e.is_connect() => {
                if attempts == 1 {
                    info!("Waiting for {} ...", health_url);
                }
            }
            Err(e) => warn!("Health check error: {}", e),
        }

        if Instant::now() + HEALTH_POLL_INTERVAL >= deadline {
            return Err(E2eError::ServerHealthCheck(attempts));
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// Ask the OS for an unused local port
pub fn find_free_port() -> E2eResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
