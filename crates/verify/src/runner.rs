//! Scenario runner: drives a browser session through a scenario, captures
//! evidence and reports the outcome

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activation::ActivationHelper;
use crate::config::VerifyConfig;
use crate::driver::BrowserSession;
use crate::error::{FailureKind, VerifyError, VerifyResult};
use crate::scenario::{Phase, Scenario, Step};
use crate::server::wait_until_reachable;
use crate::visual::{BaselineStore, VisualDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    /// Step that failed, if the failure happened inside the journey
    pub step: Option<String>,
    pub message: String,
    /// Page URL at the time of failure, when it could be read
    pub url: Option<String>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub email: Option<String>,
    /// Screenshot written by this run (success or error path)
    pub evidence: Option<PathBuf>,
    pub failure: Option<FailureReport>,
    pub phases: Vec<Phase>,
    pub visual: Option<VisualDiff>,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of running a list of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
}

/// Ordered record of the phases a scenario went through
#[derive(Debug, Default)]
struct PhaseTrace {
    phases: Vec<Phase>,
}

impl PhaseTrace {
    fn new() -> Self {
        Self {
            phases: vec![Phase::Init],
        }
    }

    fn enter(&mut self, scenario: &str, phase: Phase) {
        if self.phases.last() != Some(&phase) {
            debug!("[{}] -> {:?}", scenario, phase);
            self.phases.push(phase);
        }
    }
}

/// A failure inside the journey, tagged with the step it happened at
struct StepFailure {
    step: Option<String>,
    error: VerifyError,
}

impl StepFailure {
    fn at(step: &Step) -> impl FnOnce(VerifyError) -> StepFailure + '_ {
        move |error| StepFailure {
            step: Some(step.describe()),
            error,
        }
    }

    fn capture(error: VerifyError) -> StepFailure {
        StepFailure {
            step: Some("screenshot".to_string()),
            error,
        }
    }
}

/// Main verification runner
pub struct ScenarioRunner {
    config: VerifyConfig,
    activation: ActivationHelper,
    baselines: Option<BaselineStore>,
    update_baselines: bool,
}

impl ScenarioRunner {
    pub fn new(config: VerifyConfig) -> Self {
        let activation = ActivationHelper::new(&config.activation, &config.project_dir);
        Self {
            config,
            activation,
            baselines: None,
            update_baselines: false,
        }
    }

    /// Compare every success screenshot against `store`; with `update`, the
    /// evidence replaces the baseline instead.
    pub fn with_baselines(mut self, store: BaselineStore, update: bool) -> Self {
        self.baselines = Some(store);
        self.update_baselines = update;
        self
    }

    /// Make sure the target app answers before any browser is launched.
    pub async fn preflight(&self) -> VerifyResult<()> {
        if self.config.health.skip {
            debug!("Health check skipped");
            return Ok(());
        }
        wait_until_reachable(&self.config.base_url, self.config.health.timeout()).await
    }

    /// Run scenarios one after another.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteReport {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(scenarios.len());

        info!("Running {} scenario(s) against {}", scenarios.len(), self.config.base_url);

        for scenario in scenarios {
            let report = self.run(scenario).await;
            match &report.failure {
                None => info!("✓ {} ({} ms)", report.name, report.duration_ms),
                Some(f) => error!("✗ {} [{}] {}", report.name, f.kind, f.message),
            }
            reports.push(report);
        }

        let passed = reports.iter().filter(|r| r.passed()).count();
        let failed = reports.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!("Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteReport {
            total: reports.len(),
            passed,
            failed,
            duration_ms,
            scenarios: reports,
        }
    }

    /// Run one scenario. Never returns an error: every failure is reported,
    /// and the browser session is closed on every path.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let start = Instant::now();
        let mut trace = PhaseTrace::new();

        let email = scenario
            .unique_email
            .as_ref()
            .map(|template| template.generate(Utc::now()));
        if let Some(email) = &email {
            info!("[{}] Using unique email {}", scenario.name, email);
        }
        let resolved = scenario.with_email(email.as_deref());
        let viewport = scenario.viewport.unwrap_or(self.config.browser.viewport);

        let launched = BrowserSession::launch(
            &self.config.browser,
            viewport,
            &self.config.base_url,
            &self.config.project_dir,
        )
        .await;

        let mut session = match launched {
            Ok(session) => session,
            Err(e) => {
                error!("[{}] Could not open a browser session: {}", scenario.name, e);
                trace.enter(&scenario.name, Phase::Failed);
                trace.enter(&scenario.name, Phase::Closed);
                return ScenarioReport {
                    name: scenario.name.clone(),
                    outcome: Outcome::Failed,
                    email,
                    evidence: None,
                    failure: Some(FailureReport {
                        kind: e.failure_kind(),
                        step: None,
                        message: e.to_string(),
                        url: None,
                    }),
                    phases: trace.phases,
                    visual: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let driven = self.drive(&mut session, &resolved, &mut trace).await;

        let mut visual = None;
        let (evidence, failure) = match driven {
            Ok(path) => match self.check_visual(&scenario.name, &path) {
                Ok(diff) => {
                    trace.enter(&scenario.name, Phase::Captured);
                    visual = diff;
                    (Some(path), None)
                }
                Err(e) => {
                    trace.enter(&scenario.name, Phase::Failed);
                    let failure = FailureReport {
                        kind: e.failure_kind(),
                        step: Some("visual".to_string()),
                        message: e.to_string(),
                        url: None,
                    };
                    (Some(path), Some(failure))
                }
            },
            Err(failure) => {
                trace.enter(&scenario.name, Phase::Failed);
                warn!(
                    "[{}] Failed at {}: {}",
                    scenario.name,
                    failure.step.as_deref().unwrap_or("start"),
                    failure.error
                );
                let url = session.current_url().await.ok();
                let evidence = self.capture_error_evidence(&mut session, scenario).await;
                let report = FailureReport {
                    kind: failure.error.failure_kind(),
                    step: failure.step,
                    message: failure.error.to_string(),
                    url,
                };
                (evidence, Some(report))
            }
        };

        if let Err(e) = session.close().await {
            warn!("[{}] Error closing browser session: {}", scenario.name, e);
        }
        trace.enter(&scenario.name, Phase::Closed);

        ScenarioReport {
            name: scenario.name.clone(),
            outcome: if failure.is_none() { Outcome::Passed } else { Outcome::Failed },
            email,
            evidence,
            failure,
            phases: trace.phases,
            visual,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Navigate, interact, wait and capture the success screenshot.
    async fn drive(
        &self,
        session: &mut BrowserSession,
        scenario: &Scenario,
        trace: &mut PhaseTrace,
    ) -> Result<PathBuf, StepFailure> {
        let open = Step::Navigate {
            path: scenario.start_path.clone(),
        };
        trace.enter(&scenario.name, Phase::Navigating);
        session.execute(&open).await.map_err(StepFailure::at(&open))?;

        for step in &scenario.steps {
            if let Some(phase) = step.phase() {
                trace.enter(&scenario.name, phase);
            }
            let result = match step {
                Step::Activate { email } => self.activation.activate(email).await.map(|_| ()),
                Step::Log { message } => {
                    info!("[{}] {}", scenario.name, message);
                    Ok(())
                }
                _ => session.execute(step).await,
            };
            result.map_err(StepFailure::at(step))?;
        }

        let path = self.config.artifact_path(&scenario.evidence.path);
        session
            .screenshot(&path, scenario.evidence.full_page)
            .await
            .map_err(StepFailure::capture)?;
        info!("[{}] Evidence saved to {}", scenario.name, path.display());
        Ok(path)
    }

    /// Best-effort forensic screenshot; a failure here is only logged.
    async fn capture_error_evidence(
        &self,
        session: &mut BrowserSession,
        scenario: &Scenario,
    ) -> Option<PathBuf> {
        let path = self.config.artifact_path(&scenario.error_path());
        match session.screenshot(&path, scenario.evidence.full_page).await {
            Ok(path) => {
                info!("[{}] Error screenshot saved to {}", scenario.name, path.display());
                Some(path)
            }
            Err(e) => {
                warn!("[{}] Could not capture error screenshot: {}", scenario.name, e);
                None
            }
        }
    }

    fn check_visual(&self, name: &str, evidence: &std::path::Path) -> VerifyResult<Option<VisualDiff>> {
        let Some(store) = &self.baselines else {
            return Ok(None);
        };
        if self.update_baselines {
            store.update(name, evidence)?;
            return Ok(None);
        }
        match store.check(name, evidence) {
            Ok(diff) => Ok(Some(diff)),
            Err(VerifyError::BaselineNotFound(path)) => {
                info!("No baseline for '{}' at {}; run with --update-baselines to create it", name, path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the suite report as JSON into the artifact directory.
    pub fn write_results(&self, results: &SuiteReport) -> VerifyResult<PathBuf> {
        std::fs::create_dir_all(&self.config.artifact_dir)?;

        let path = self.config.artifact_dir.join("results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use tempfile::TempDir;

    fn offline_config(dir: &TempDir) -> VerifyConfig {
        let mut config = VerifyConfig {
            artifact_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.browser.node_binary = "/nonexistent/node".to_string();
        config
    }

    #[test]
    fn test_phase_trace_dedups_consecutive_phases() {
        let mut trace = PhaseTrace::new();
        trace.enter("s", Phase::Interacting);
        trace.enter("s", Phase::Interacting);
        trace.enter("s", Phase::Waiting);
        trace.enter("s", Phase::Interacting);
        assert_eq!(
            trace.phases,
            vec![Phase::Init, Phase::Interacting, Phase::Waiting, Phase::Interacting]
        );
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported_and_closed() {
        let dir = TempDir::new().unwrap();
        let runner = ScenarioRunner::new(offline_config(&dir));

        let report = runner.run(&catalog::agency_onboarding()).await;
        assert!(!report.passed());
        assert_eq!(report.phases.last(), Some(&Phase::Closed));
        assert!(report.phases.contains(&Phase::Failed));
        assert!(report.email.as_deref().unwrap().starts_with("test-agency-"));
        assert_eq!(report.failure.unwrap().kind, FailureKind::Unknown);
        assert!(report.evidence.is_none());
    }

    #[tokio::test]
    async fn test_suite_report_counts_and_results_file() {
        let dir = TempDir::new().unwrap();
        let runner = ScenarioRunner::new(offline_config(&dir));

        let suite = runner
            .run_all(&[catalog::dashboard(), catalog::login_page()])
            .await;
        assert_eq!(suite.total, 2);
        assert_eq!(suite.failed, 2);
        assert_eq!(suite.passed, 0);

        let path = runner.write_results(&suite).unwrap();
        let parsed: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.scenarios[0].name, catalog::DASHBOARD);
        assert_eq!(parsed.scenarios[1].outcome, Outcome::Failed);
    }

    /// Stand-in for `node`: answers `--version`, performs the readiness
    /// handshake and replies to every request, failing with a timeout fault
    /// on requests containing `fail_on`. Screenshot requests create the file.
    #[cfg(unix)]
    const FAKE_DRIVER: &str = r##"#!/bin/sh
if [ "$1" = "--version" ]; then echo v20.0.0; exit 0; fi
echo '{"ready":true}'
while IFS= read -r line; do
  printf '%s\n' "$line" >> '__LOG__'
  case "$line" in
    *'"op":"close"'*) exit 0 ;;
  esac
  id=$(printf '%s\n' "$line" | sed -n 's/^{"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'__FAIL_ON__'*)
      echo "{\"id\":$id,\"ok\":false,\"error\":{\"kind\":\"timeout\",\"message\":\"Timeout exceeded\"}}" ;;
    *'page.screenshot('*)
      : > "$(printf '%s\n' "$line" | sed -n 's/.*path: \\"\([^\\]*\)\\".*/\1/p')"
      echo "{\"id\":$id,\"ok\":true,\"value\":null}" ;;
    *'page.url()'*)
      echo "{\"id\":$id,\"ok\":true,\"value\":\"http://localhost:5173/\"}" ;;
    *)
      echo "{\"id\":$id,\"ok\":true,\"value\":null}" ;;
  esac
done
"##;

    #[cfg(unix)]
    struct FakeDriver {
        dir: TempDir,
    }

    #[cfg(unix)]
    impl FakeDriver {
        fn new(fail_on: &str) -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = TempDir::new().unwrap();
            let script = FAKE_DRIVER
                .replace("__LOG__", &dir.path().join("requests.log").to_string_lossy())
                .replace("__FAIL_ON__", fail_on);
            let path = dir.path().join("node");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir }
        }

        fn config(&self) -> VerifyConfig {
            let mut config = VerifyConfig {
                artifact_dir: self.dir.path().join("out"),
                ..Default::default()
            };
            config.browser.node_binary = self.dir.path().join("node").to_string_lossy().into_owned();
            config.browser.launch_timeout_secs = 5;
            config
        }

        fn requests(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("requests.log"))
                .unwrap_or_default()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_timeout_captures_error_screenshot_and_closes() {
        let driver = FakeDriver::new("waitFor(");
        let config = driver.config();
        let out = config.artifact_dir.clone();

        let report = ScenarioRunner::new(config).run(&catalog::dashboard()).await;

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(
            report.phases,
            vec![Phase::Init, Phase::Navigating, Phase::Waiting, Phase::Failed, Phase::Closed]
        );
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::LocatorTimeout);
        assert_eq!(failure.url.as_deref(), Some("http://localhost:5173/"));
        assert_eq!(report.evidence, Some(out.join("dashboard-error.png")));
        assert!(out.join("dashboard-error.png").exists());
        assert!(!out.join("dashboard.png").exists());

        let requests = driver.requests();
        let position = |needle: &str| requests.iter().position(|r| r.contains(needle)).unwrap();
        assert!(position("page.url()") < position("page.screenshot("));
        assert!(position("page.screenshot(") < position(r#"{"op":"close"}"#));
        assert_eq!(requests.last().map(String::as_str), Some(r#"{"op":"close"}"#));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_writes_evidence_and_closes() {
        let driver = FakeDriver::new("no-such-request");
        let config = driver.config();
        let out = config.artifact_dir.clone();

        let report = ScenarioRunner::new(config).run(&catalog::agency_onboarding()).await;

        assert!(report.passed(), "unexpected failure: {:?}", report.failure);
        assert_eq!(
            report.phases,
            vec![
                Phase::Init,
                Phase::Navigating,
                Phase::Interacting,
                Phase::Waiting,
                Phase::Captured,
                Phase::Closed
            ]
        );
        assert!(out.join("agency_onboarding_success.png").exists());
        assert!(!out.join("agency-onboarding-error.png").exists());

        let email = report.email.unwrap();
        let requests = driver.requests();
        assert!(requests.iter().any(|r| r.contains(&email)));
        assert_eq!(requests.last().map(String::as_str), Some(r#"{"op":"close"}"#));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_url_wait_timeout_reports_actual_page() {
        let driver = FakeDriver::new("waitForURL(");
        let report = ScenarioRunner::new(driver.config())
            .run(&catalog::agency_onboarding())
            .await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::AssertionFailure);
        assert!(failure.message.contains("page is at http://localhost:5173/"), "{}", failure.message);
        assert_eq!(report.phases.last(), Some(&Phase::Closed));
    }

    #[tokio::test]
    async fn test_preflight_can_be_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = offline_config(&dir);
        config.base_url = "http://127.0.0.1:9".to_string();
        config.health.skip = true;
        ScenarioRunner::new(config).preflight().await.unwrap();
    }
}
