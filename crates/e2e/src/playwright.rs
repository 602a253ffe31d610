//! Playwright browser automation
//!
//! Each session is one `node` process running a small bridge script. The
//! bridge launches a browser with a single fresh context and page, then
//! answers line-delimited JSON requests on stdin:
//!
//! ```text
//! -> {"id":3,"op":"query","selector":{"by":"css","css":".template-card"}}
//! <- {"id":3,"ok":true,"result":["e1","e2"]}
//! <- {"id":4,"ok":false,"kind":"timeout","error":"Timeout 30000ms exceeded."}
//! ```
//!
//! Element handles live in the bridge and are referred to by id.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use crate::driver::{BrowserSession, ElementHandle, SessionFactory};
use crate::error::{E2eError, E2eResult};
use crate::selector::Selector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

/// Configuration for Playwright sessions
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// `node` executable
    pub node_binary: PathBuf,
    /// Module search path for `require('playwright')`; defaults to
    /// `./node_modules`
    pub node_path: Option<PathBuf>,
    /// Bound on browser launch until the bridge reports ready
    pub launch_timeout: Duration,
    /// Bound on any single bridge request
    pub request_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: PathBuf::from("node"),
            node_path: None,
            launch_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

const BRIDGE_SCRIPT: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const fail = (kind, error) => Object.assign(error, { kind });

(async () => {
  const browserType = playwright[process.env.E2E_BROWSER || 'chromium'];
  const browser = await browserType.launch({ headless: process.env.E2E_HEADLESS !== '0' });
  const context = await browser.newContext({
    viewport: {
      width: Number(process.env.E2E_VIEWPORT_WIDTH) || 1280,
      height: Number(process.env.E2E_VIEWPORT_HEIGHT) || 720,
    },
  });
  const page = await context.newPage();
  const handles = new Map();
  let nextHandle = 1;

  const locatorFor = (s) => {
    switch (s.by) {
      case 'css': return page.locator(s.css);
      case 'test_id': return page.getByTestId(s.id);
      case 'text': return page.getByText(new RegExp(s.source, s.case_insensitive ? 'i' : ''));
      case 'role': return page.getByRole(s.role, s.name ? { name: s.name } : {});
      default: throw fail('protocol', new Error('unknown selector strategy ' + s.by));
    }
  };

  const handle = (id) => {
    const h = handles.get(id);
    if (!h) throw fail('protocol', new Error('stale element handle ' + id));
    return h;
  };

  const ops = {
    navigate: async (r) => {
      try {
        await page.goto(r.url, { timeout: r.timeout_ms });
      } catch (e) {
        throw fail('navigation', e);
      }
      handles.clear();
      return null;
    },
    wait_for_network_idle: async (r) => {
      try {
        await page.waitForLoadState('networkidle', { timeout: r.timeout_ms });
      } catch (e) {
        throw fail('timeout', e);
      }
      return null;
    },
    query: async (r) => {
      const found = await locatorFor(r.selector).elementHandles();
      return found.map((h) => {
        const id = 'e' + nextHandle++;
        handles.set(id, h);
        return id;
      });
    },
    click: async (r) => { await handle(r.element).click(); return null; },
    is_visible: async (r) => handle(r.element).isVisible(),
    visible_text: async (r) => handle(r.element).innerText(),
    dispose: async (r) => {
      for (const id of r.elements) {
        const h = handles.get(id);
        if (h) {
          handles.delete(id);
          await h.dispose();
        }
      }
      return null;
    },
    screenshot: async (r) => { await page.screenshot({ path: r.path, fullPage: true }); return null; },
    close: async () => { await browser.close(); return null; },
  };

  const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
  send({ ready: true });

  for await (const line of readline.createInterface({ input: process.stdin })) {
    let req;
    try {
      req = JSON.parse(line);
    } catch (e) {
      continue;
    }
    try {
      const op = ops[req.op];
      if (!op) throw fail('protocol', new Error('unknown op ' + req.op));
      send({ id: req.id, ok: true, result: await op(req) });
    } catch (e) {
      send({ id: req.id, ok: false, kind: e.kind || 'driver', error: e.message });
    }
    if (req.op === 'close') break;
  }
  process.exit(0);
})().catch((e) => {
  console.error(e.stack || e.message);
  process.exit(1);
});
"#;

/// Launches one bridge process per session
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
    node_path: Option<PathBuf>,
    // Owns the staged script; removed on drop.
    _script_dir: tempfile::TempDir,
    script_path: PathBuf,
}

impl PlaywrightLauncher {
    /// Verify Playwright is installed and stage the bridge script
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let node_path = match &config.node_path {
            Some(path) => Some(path.clone()),
            None => std::env::current_dir().ok().map(|dir| dir.join("node_modules")),
        };

        info!(
            "Playwright ready ({}, headless: {})",
            config.browser.as_str(),
            config.headless
        );

        Ok(Self {
            config,
            node_path,
            _script_dir: script_dir,
            script_path,
        })
    }

    /// Check if Playwright is installed; the answer is cached per process
    fn check_playwright_installed() -> E2eResult<()> {
        static INSTALLED: OnceCell<bool> = OnceCell::new();

        let installed = *INSTALLED.get_or_init(|| {
            Command::new("npx")
                .args(["playwright", "--version"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        });

        if installed {
            Ok(())
        } else {
            Err(E2eError::PlaywrightNotFound)
        }
    }

    fn command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.config.node_binary);
        cmd.arg(&self.script_path)
            .env("E2E_BROWSER", self.config.browser.as_str())
            .env("E2E_HEADLESS", if self.config.headless { "1" } else { "0" })
            .env("E2E_VIEWPORT_WIDTH", self.config.viewport_width.to_string())
            .env("E2E_VIEWPORT_HEIGHT", self.config.viewport_height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(node_path) = &self.node_path {
            cmd.env("NODE_PATH", node_path);
        }
        cmd
    }
}

#[async_trait]
impl SessionFactory for PlaywrightLauncher {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>> {
        let mut child = self.command().spawn().map_err(|e| {
            E2eError::Bridge(format!(
                "failed to spawn {}: {}",
                self.config.node_binary.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let mut session = PlaywrightSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            request_timeout: self.config.request_timeout,
            closed: false,
        };

        match tokio::time::timeout(self.config.launch_timeout, session.read_ready()).await {
            Ok(ready) => ready?,
            Err(_) => {
                return Err(E2eError::Bridge(format!(
                    "browser did not launch within {} ms",
                    self.config.launch_timeout.as_millis()
                )))
            }
        }

        debug!("Playwright session ready (pid: {:?})", session.child.id());
        Ok(Box::new(session))
    }
}

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl BridgeMessage {
    fn into_result(self, op: &str) -> E2eResult<Value> {
        if self.ok {
            return Ok(self.result);
        }
        let message = format!(
            "{}: {}",
            op,
            self.error.unwrap_or_else(|| "unknown error".to_string())
        );
        Err(match self.kind.as_deref() {
            Some("navigation") => E2eError::Navigation(message),
            Some("timeout") => E2eError::Timeout(message),
            _ => E2eError::Bridge(message),
        })
    }
}

/// One browser context behind one bridge process
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    request_timeout: Duration,
    closed: bool,
}

impl PlaywrightSession {
    async fn read_message(&mut self) -> E2eResult<BridgeMessage> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| E2eError::Bridge("bridge process exited".into()))?;

            match serde_json::from_str::<BridgeMessage>(&line) {
                Ok(message) => return Ok(message),
                Err(_) => debug!(target: "playwright", "{}", line),
            }
        }
    }

    async fn read_ready(&mut self) -> E2eResult<()> {
        loop {
            if self.read_message().await?.ready {
                return Ok(());
            }
        }
    }

    async fn request(&mut self, op: &str, mut params: Value) -> E2eResult<Value> {
        if self.closed {
            return Err(E2eError::Bridge(format!("{}: session already closed", op)));
        }

        self.next_id += 1;
        let id = self.next_id;
        params["id"] = json!(id);
        params["op"] = json!(op);

        let mut line = serde_json::to_string(&params)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let limit = self.request_timeout;
        let wait = async {
            loop {
                let message = self.read_message().await?;
                if message.id == Some(id) {
                    return message.into_result(op);
                }
            }
        };

        match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::Bridge(format!(
                "{}: no response within {} ms",
                op,
                limit.as_millis()
            ))),
        }
    }

    fn element_ids(value: Value) -> E2eResult<Vec<ElementHandle>> {
        let ids: Vec<String> = serde_json::from_value(value)?;
        Ok(ids.into_iter().map(ElementHandle::new).collect())
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        // Leave room for the bridge to report its own navigation error.
        let timeout_ms = (self.request_timeout.as_millis() as u64).saturating_sub(1000);
        self.request("navigate", json!({ "url": url, "timeout_ms": timeout_ms }))
            .await?;
        Ok(())
    }

    async fn wait_for_network_idle(&mut self, timeout: Duration) -> E2eResult<()> {
        self.request(
            "wait_for_network_idle",
            json!({ "timeout_ms": timeout.as_millis() as u64 }),
        )
        .await?;
        Ok(())
    }

    async fn query(&mut self, selector: &Selector) -> E2eResult<Vec<ElementHandle>> {
        let value = self.request("query", json!({ "selector": selector })).await?;
        Self::element_ids(value)
    }

    async fn click(&mut self, element: &ElementHandle) -> E2eResult<()> {
        self.request("click", json!({ "element": element })).await?;
        Ok(())
    }

    async fn is_visible(&mut self, element: &ElementHandle) -> E2eResult<bool> {
        let value = self.request("is_visible", json!({ "element": element })).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn visible_text(&mut self, element: &ElementHandle) -> E2eResult<String> {
        let value = self.request("visible_text", json!({ "element": element })).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn dispose(&mut self, elements: &[ElementHandle]) -> E2eResult<()> {
        if elements.is_empty() {
            return Ok(());
        }
        self.request("dispose", json!({ "elements": elements })).await?;
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<bool> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.request("screenshot", json!({ "path": path })).await?;
        Ok(true)
    }

    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        let closing = self.request("close", json!({})).await;
        self.closed = true;

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => warn!("Playwright bridge exited with {}", status),
            _ => {
                warn!("Playwright bridge did not exit, killing it");
                self.child.kill().await?;
            }
        }
        closing.map(|_| ())
    }
}
