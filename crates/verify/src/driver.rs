//! Playwright browser session
//!
//! The browser is driven by a small Node program that owns one Playwright
//! browser, one fresh context and one page. The Rust side sends it
//! newline-delimited JSON requests on stdin, each carrying a snippet of
//! async JavaScript rendered from a [`Step`], and reads one JSON reply per
//! request from stdout:
//!
//! ```text
//! -> {"id":3,"code":"await page.getByLabel(\"CNPJ\", ...).fill(...)"}
//! <- {"id":3,"ok":true,"value":null}
//! <- {"id":4,"ok":false,"error":{"kind":"timeout","message":"..."}}
//! ```
//!
//! The first line the driver prints is a readiness handshake. Sending
//! `{"op":"close"}` (or closing stdin) closes the context and browser.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::error::{VerifyError, VerifyResult};
use crate::locator::js_string;
use crate::scenario::{join_url, Step, UrlMatch, Viewport, DEFAULT_WAIT_TIMEOUT_MS};

/// Timeout for navigation, fill and click when a step does not set one.
pub const ACTION_TIMEOUT_MS: u64 = 30_000;

/// Extra time the Rust side waits beyond a step's own timeout before it
/// gives up on the driver.
const REPLY_GRACE: Duration = Duration::from_secs(5);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
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

const DRIVER_TEMPLATE: &str = r#"
const path = require('path');
const readline = require('readline');
const { createRequire } = require('module');

const projectRequire = createRequire(path.join(process.cwd(), 'package.json'));
let playwright;
try {
  playwright = projectRequire('playwright');
} catch (_) {
  playwright = projectRequire('@playwright/test');
}

const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;

function send(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

function describe(error) {
  const kind = error && error.name === 'TimeoutError'
    ? 'timeout'
    : error && error.name === 'AssertionError' ? 'assertion' : 'unknown';
  return { kind, message: String((error && error.message) || error) };
}

(async () => {
  let browser;
  let context;
  let page;
  try {
    browser = await playwright.__BROWSER__.launch({ headless: __HEADLESS__ });
    context = await browser.newContext({ viewport: { width: __WIDTH__, height: __HEIGHT__ } });
    page = await context.newPage();
  } catch (error) {
    send({ ready: false, error: describe(error) });
    if (browser) await browser.close().catch(() => {});
    process.exit(1);
  }
  send({ ready: true });

  const lines = readline.createInterface({ input: process.stdin });
  for await (const line of lines) {
    if (!line.trim()) continue;
    let request;
    try {
      request = JSON.parse(line);
    } catch (error) {
      send({ id: null, ok: false, error: describe(error) });
      continue;
    }
    if (request.op === 'close') break;
    try {
      const value = await new AsyncFunction('page', request.code)(page);
      send({ id: request.id, ok: true, value: value === undefined ? null : value });
    } catch (error) {
      send({ id: request.id, ok: false, error: describe(error) });
    }
  }

  await context.close().catch(() => {});
  await browser.close().catch(() => {});
  send({ closed: true });
})();
"#;

/// Render the driver program for a browser configuration.
pub fn driver_script(browser: Browser, headless: bool, viewport: Viewport) -> String {
    DRIVER_TEMPLATE
        .replace("__BROWSER__", browser.as_str())
        .replace("__HEADLESS__", if headless { "true" } else { "false" })
        .replace("__WIDTH__", &viewport.width.to_string())
        .replace("__HEIGHT__", &viewport.height.to_string())
}

/// Render a browser step as a driver request body.
///
/// Returns `None` for steps the driver does not handle (activation and log
/// steps run on the Rust side).
pub fn step_to_js(step: &Step, base_url: &str) -> Option<String> {
    let code = match step {
        Step::Navigate { path } => format!(
            "await page.goto({}, {{ timeout: {} }});",
            js_string(&join_url(base_url, path)),
            ACTION_TIMEOUT_MS
        ),
        Step::Fill { target, value } => format!(
            "await {}.fill({}, {{ timeout: {} }});",
            target.to_js(),
            js_string(value),
            ACTION_TIMEOUT_MS
        ),
        Step::Click { target, timeout_ms } => format!(
            "await {}.click({{ timeout: {} }});",
            target.to_js(),
            timeout_ms.unwrap_or(ACTION_TIMEOUT_MS)
        ),
        Step::WaitVisible { target, timeout_ms } => format!(
            "await {}.waitFor({{ state: 'visible', timeout: {} }});",
            target.to_js(),
            timeout_ms
        ),
        Step::AssertVisible { target } => format!(
            "await {}.waitFor({{ state: 'visible', timeout: {} }});",
            target.to_js(),
            DEFAULT_WAIT_TIMEOUT_MS
        ),
        Step::WaitUrl { url, timeout_ms } => {
            let predicate = match url.resolve(base_url) {
                UrlMatch::Exact(expected) => format!("(url) => url.href === {}", js_string(&expected)),
                UrlMatch::Pattern { pattern } => {
                    format!("(url) => new RegExp({}).test(url.href)", js_string(&pattern))
                }
            };
            format!(
                "await page.waitForURL({}, {{ timeout: {}, waitUntil: 'commit' }});",
                predicate, timeout_ms
            )
        }
        Step::Settle { timeout_ms } => format!(
            r#"await page.waitForLoadState('networkidle', {{ timeout: {t} }});
await page.waitForFunction(() => document.fonts.status === 'loaded', null, {{ timeout: {t} }});
await page.waitForFunction(
  () => document.getAnimations().every((a) =>
    a.playState !== 'running' ||
    (a.effect && a.effect.getComputedTiming().iterations === Infinity)),
  null,
  {{ timeout: {t} }});"#,
            t = timeout_ms
        ),
        Step::Activate { .. } | Step::Log { .. } => return None,
    };
    Some(code)
}

/// How long the Rust side waits for a step's reply.
fn reply_timeout(step: &Step) -> Duration {
    let step_ms = match step {
        Step::Navigate { .. } | Step::Fill { .. } => ACTION_TIMEOUT_MS,
        Step::Click { timeout_ms, .. } => timeout_ms.unwrap_or(ACTION_TIMEOUT_MS),
        Step::WaitVisible { timeout_ms, .. } | Step::WaitUrl { timeout_ms, .. } => *timeout_ms,
        // three sequential waits
        Step::Settle { timeout_ms } => timeout_ms.saturating_mul(3),
        Step::AssertVisible { .. } => DEFAULT_WAIT_TIMEOUT_MS,
        Step::Activate { .. } | Step::Log { .. } => 0,
    };
    Duration::from_millis(step_ms) + REPLY_GRACE
}

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<DriverFault>,
    #[serde(default)]
    ready: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverFault {
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Timeout,
    Assertion,
    Unknown,
}

/// Map a driver-side fault for `step` onto a harness error.
pub fn fault_to_error(step: &Step, fault: DriverFault) -> VerifyError {
    match (fault.kind, step) {
        (FaultKind::Timeout, Step::WaitUrl { url, timeout_ms }) => VerifyError::AssertionFailed(
            format!(
                "URL did not match {:?} within {} ms: {}",
                url, timeout_ms, fault.message
            ),
        ),
        (FaultKind::Timeout, Step::Navigate { path }) => VerifyError::AssertionFailed(format!(
            "{} did not load within {} ms: {}",
            path, ACTION_TIMEOUT_MS, fault.message
        )),
        (FaultKind::Timeout, _) => VerifyError::LocatorTimeout {
            what: step.describe(),
            timeout_ms: reply_timeout(step).saturating_sub(REPLY_GRACE).as_millis() as u64,
        },
        (FaultKind::Assertion, _) => VerifyError::AssertionFailed(fault.message),
        (FaultKind::Unknown, _) => VerifyError::Driver(fault.message),
    }
}

/// One isolated browser session: a fresh browser, context and page.
pub struct BrowserSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    base_url: String,
    next_id: u64,
    closed: bool,

    /// Holds the driver script for the life of the session
    _script_dir: TempDir,
}

impl BrowserSession {
    /// Launch a browser and wait for the driver's readiness handshake.
    pub async fn launch(
        config: &BrowserConfig,
        viewport: Viewport,
        base_url: &str,
        project_dir: &Path,
    ) -> VerifyResult<Self> {
        check_node_installed(&config.node_binary)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(
            &script_path,
            driver_script(config.kind, config.headless, viewport),
        )?;

        debug!("Starting Playwright driver: {}", script_path.display());

        let mut child = Command::new(&config.node_binary)
            .arg(&script_path)
            .current_dir(project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VerifyError::DriverStartup(format!("failed to spawn {}: {}", config.node_binary, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VerifyError::DriverStartup("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VerifyError::DriverStartup("driver stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "agenda_verify::driver::stderr", "{}", line);
                }
            });
        }

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            base_url: base_url.to_string(),
            next_id: 1,
            closed: false,
            _script_dir: script_dir,
        };

        let handshake = timeout(config.launch_timeout(), session.read_reply()).await;
        match handshake {
            Ok(Ok(reply)) if reply.ready == Some(true) => {
                info!(
                    "Launched {} ({}x{}, headless: {})",
                    config.kind.as_str(),
                    viewport.width,
                    viewport.height,
                    config.headless
                );
                Ok(session)
            }
            Ok(Ok(reply)) => {
                let reason = reply
                    .error
                    .map(|f| f.message)
                    .unwrap_or_else(|| "unexpected handshake".to_string());
                session.kill().await;
                Err(VerifyError::DriverStartup(reason))
            }
            Ok(Err(e)) => {
                session.kill().await;
                Err(VerifyError::DriverStartup(e.to_string()))
            }
            Err(_) => {
                session.kill().await;
                Err(VerifyError::DriverStartup(format!(
                    "browser did not launch within {:?}",
                    config.launch_timeout()
                )))
            }
        }
    }

    /// Execute one browser step. Steps with no browser side are a no-op.
    pub async fn execute(&mut self, step: &Step) -> VerifyResult<()> {
        let Some(code) = step_to_js(step, &self.base_url) else {
            return Ok(());
        };
        let fault = match self.call(&code, reply_timeout(step)).await? {
            Ok(_) => return Ok(()),
            Err(fault) => fault,
        };
        let mut error = fault_to_error(step, fault);
        if let (Step::WaitUrl { url, .. }, VerifyError::AssertionFailed(message)) = (step, &mut error) {
            if let Ok(actual) = self.current_url().await {
                if !url.resolve(&self.base_url).matches(&actual) {
                    message.push_str(&format!(" (page is at {})", actual));
                }
            }
        }
        Err(error)
    }

    /// Save a screenshot of the page to `path`.
    pub async fn screenshot(&mut self, path: &Path, full_page: bool) -> VerifyResult<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let code = format!(
            "await page.screenshot({{ path: {}, fullPage: {} }});",
            js_string(&absolute.to_string_lossy()),
            full_page
        );
        match self
            .call(&code, Duration::from_millis(ACTION_TIMEOUT_MS) + REPLY_GRACE)
            .await?
        {
            Ok(_) => Ok(path.to_path_buf()),
            Err(fault) => Err(VerifyError::Driver(fault.message)),
        }
    }

    /// Current page URL.
    pub async fn current_url(&mut self) -> VerifyResult<String> {
        match self.call("return page.url();", REPLY_GRACE).await? {
            Ok(Value::String(url)) => Ok(url),
            Ok(other) => Ok(other.to_string()),
            Err(fault) => Err(VerifyError::Driver(fault.message)),
        }
    }

    /// Send a request and wait for its reply. The outer error is a transport
    /// failure; the inner one is a fault raised by the page code.
    async fn call(
        &mut self,
        code: &str,
        wait: Duration,
    ) -> VerifyResult<Result<Value, DriverFault>> {
        if self.closed {
            return Err(VerifyError::Driver("session already closed".into()));
        }
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&DriverRequest { id, code })?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = timeout(wait, async {
            loop {
                let reply = self.read_reply().await?;
                if reply.id == Some(id) {
                    return Ok::<_, VerifyError>(reply);
                }
                debug!("Ignoring driver reply for request {:?}", reply.id);
            }
        })
        .await
        .map_err(|_| VerifyError::Driver(format!("no reply from driver within {:?}", wait)))??;

        if reply.ok {
            Ok(Ok(reply.value))
        } else {
            Ok(Err(reply.error.unwrap_or(DriverFault {
                kind: FaultKind::Unknown,
                message: "driver reported failure without details".into(),
            })))
        }
    }

    async fn read_reply(&mut self) -> VerifyResult<DriverReply> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or(VerifyError::DriverExited)?;
            match serde_json::from_str::<DriverReply>(&line) {
                Ok(reply) => return Ok(reply),
                Err(_) => debug!("driver: {}", line),
            }
        }
    }

    /// Close the context and browser, killing the driver if it does not exit
    /// in time. Safe to call more than once.
    pub async fn close(&mut self) -> VerifyResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let graceful = async {
            self.stdin.write_all(b"{\"op\":\"close\"}\n").await?;
            self.stdin.flush().await?;
            Ok::<_, std::io::Error>(self.child.wait().await?)
        };

        match timeout(CLOSE_TIMEOUT, graceful).await {
            Ok(Ok(status)) => {
                debug!("Driver exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Driver did not close cleanly: {}", e);
                self.kill().await;
                Ok(())
            }
            Err(_) => {
                warn!("Driver did not exit within {:?}, killing", CLOSE_TIMEOUT);
                self.kill().await;
                Ok(())
            }
        }
    }

    async fn kill(&mut self) {
        self.closed = true;
        let _ = self.child.kill().await;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.start_kill();
        }
    }
}

/// Check that the Node executable can be run
fn check_node_installed(node_binary: &str) -> VerifyResult<()> {
    let status = std::process::Command::new(node_binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(VerifyError::NodeNotFound(node_binary.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Locator;

    const BASE: &str = "http://localhost:5173";

    #[test]
    fn test_driver_script_substitution() {
        let script = driver_script(Browser::Firefox, false, Viewport { width: 1920, height: 1080 });
        assert!(script.contains("playwright.firefox.launch({ headless: false })"));
        assert!(script.contains("viewport: { width: 1920, height: 1080 }"));
        assert!(!script.contains("__"));
    }

    #[test]
    fn test_navigate_joins_base_url() {
        let js = step_to_js(&Step::Navigate { path: "/login".into() }, "http://localhost:5173/")
            .unwrap();
        assert_eq!(js, r#"await page.goto("http://localhost:5173/login", { timeout: 30000 });"#);
    }

    #[test]
    fn test_fill_escapes_value() {
        let step = Step::Fill {
            target: Locator::label("Endereço"),
            value: "Rua \"dos\" Testes, 123".into(),
        };
        assert_eq!(
            step_to_js(&step, BASE).unwrap(),
            r#"await page.getByLabel("Endereço", { exact: false }).fill("Rua \"dos\" Testes, 123", { timeout: 30000 });"#
        );
    }

    #[test]
    fn test_wait_url_is_exact_predicate() {
        let step = Step::WaitUrl {
            url: UrlMatch::Exact("/agency-portal".into()),
            timeout_ms: 10_000,
        };
        let js = step_to_js(&step, BASE).unwrap();
        assert!(js.contains(r#"url.href === "http://localhost:5173/agency-portal""#));
        assert!(js.contains("timeout: 10000"));
    }

    #[test]
    fn test_rust_side_steps_have_no_js() {
        assert!(step_to_js(&Step::Activate { email: "a@b.c".into() }, BASE).is_none());
        assert!(step_to_js(&Step::Log { message: "hi".into() }, BASE).is_none());
    }

    #[test]
    fn test_settle_waits_on_conditions() {
        let js = step_to_js(&Step::Settle { timeout_ms: 4000 }, BASE).unwrap();
        assert!(js.contains("networkidle"));
        assert!(js.contains("getAnimations"));
        assert!(!js.contains("waitForTimeout"));
        assert_eq!(reply_timeout(&Step::Settle { timeout_ms: 4000 }), Duration::from_millis(12_000) + REPLY_GRACE);
    }

    #[test]
    fn test_fault_mapping() {
        let wait = Step::WaitVisible {
            target: Locator::heading("Dashboard"),
            timeout_ms: 15_000,
        };
        let fault = DriverFault { kind: FaultKind::Timeout, message: "Timeout 15000ms exceeded".into() };
        match fault_to_error(&wait, fault.clone()) {
            VerifyError::LocatorTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 15_000),
            other => panic!("unexpected {other:?}"),
        }

        let url = Step::WaitUrl { url: UrlMatch::Exact("/agency-portal".into()), timeout_ms: 10_000 };
        assert!(matches!(fault_to_error(&url, fault.clone()), VerifyError::AssertionFailed(_)));

        let goto = Step::Navigate { path: "/login".into() };
        let err = fault_to_error(&goto, fault);
        assert_eq!(err.failure_kind(), crate::error::FailureKind::AssertionFailure);
        assert!(err.to_string().contains("/login did not load"));

        let crash = DriverFault { kind: FaultKind::Unknown, message: "net::ERR_CONNECTION_REFUSED".into() };
        assert!(matches!(fault_to_error(&wait, crash), VerifyError::Driver(_)));
    }

    #[test]
    fn test_reply_parsing() {
        let reply: DriverReply =
            serde_json::from_str(r#"{"id":4,"ok":false,"error":{"kind":"timeout","message":"t"}}"#)
                .unwrap();
        assert_eq!(reply.id, Some(4));
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap().kind, FaultKind::Timeout);

        let ready: DriverReply = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert_eq!(ready.ready, Some(true));
        assert!(ready.id.is_none());
    }

    #[tokio::test]
    async fn test_launch_without_node_fails_fast() {
        let config = BrowserConfig {
            node_binary: "/nonexistent/node".into(),
            ..Default::default()
        };
        let err = BrowserSession::launch(&config, Viewport::default(), BASE, Path::new("."))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VerifyError::NodeNotFound(_)));
    }
}
