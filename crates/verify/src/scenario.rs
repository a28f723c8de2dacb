//! Verification scenarios: declarative YAML and built-in

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VerifyError, VerifyResult};
use crate::locator::Locator;

/// Placeholder replaced by the run's generated unique email.
pub const EMAIL_PLACEHOLDER: &str = "{email}";

/// A single user journey to verify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Path (relative to the base URL) opened before the first step
    #[serde(default = "default_start_path")]
    pub start_path: String,

    /// Overrides the configured viewport
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// When set, a unique email is generated for every run
    #[serde(default)]
    pub unique_email: Option<EmailTemplate>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Where evidence is written
    pub evidence: Evidence,
}

fn default_start_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// Shape of the generated account email: `<prefix><unix-seconds>@<domain>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub prefix: String,
    pub domain: String,
}

impl EmailTemplate {
    pub fn new(prefix: &str, domain: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            domain: domain.to_string(),
        }
    }

    pub fn generate(&self, at: DateTime<Utc>) -> String {
        format!("{}{}@{}", self.prefix, at.timestamp(), self.domain)
    }
}

/// Screenshot targets for the success and failure paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Success screenshot, relative to the artifact directory
    pub path: PathBuf,

    /// Failure screenshot; defaults to `<name>-error.png`
    #[serde(default)]
    pub error_path: Option<PathBuf>,

    #[serde(default)]
    pub full_page: bool,
}

impl Evidence {
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            error_path: None,
            full_page: false,
        }
    }

    pub fn full_page(mut self) -> Self {
        self.full_page = true;
        self
    }
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a path relative to the base URL
    Navigate { path: String },

    /// Fill an input
    Fill { target: Locator, value: String },

    /// Click an element
    Click {
        target: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for an element to become visible
    WaitVisible {
        target: Locator,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Wait for the page URL to match
    WaitUrl {
        url: UrlMatch,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Assert an element is visible (short default timeout)
    AssertVisible { target: Locator },

    /// Wait until the network is idle and animations have finished
    Settle {
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Run the external activation helper for an account
    Activate { email: String },

    /// Log a message
    Log { message: String },
}

/// Default timeout for waits and assertions, in milliseconds.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// Expected page URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlMatch {
    /// Exact URL; a leading `/` is resolved against the base URL
    Exact(String),
    Pattern { pattern: String },
}

impl UrlMatch {
    pub fn resolve(&self, base_url: &str) -> UrlMatch {
        match self {
            UrlMatch::Exact(url) if url.starts_with('/') => {
                UrlMatch::Exact(join_url(base_url, url))
            }
            other => other.clone(),
        }
    }

    pub fn matches(&self, actual: &str) -> bool {
        match self {
            UrlMatch::Exact(url) => url == actual,
            UrlMatch::Pattern { pattern } => Regex::new(pattern)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

/// Which part of the scenario state machine a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Navigating,
    Interacting,
    Waiting,
    Captured,
    Failed,
    Closed,
}

impl Step {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Step::Navigate { .. } => Some(Phase::Navigating),
            Step::Fill { .. } | Step::Click { .. } | Step::Activate { .. } => {
                Some(Phase::Interacting)
            }
            Step::WaitVisible { .. }
            | Step::WaitUrl { .. }
            | Step::AssertVisible { .. }
            | Step::Settle { .. } => Some(Phase::Waiting),
            Step::Log { .. } => None,
        }
    }

    /// Short label used in logs and reports
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { path } => format!("navigate:{}", path),
            Step::Fill { target, .. } => format!("fill:{}", target),
            Step::Click { target, .. } => format!("click:{}", target),
            Step::WaitVisible { target, .. } => format!("wait_visible:{}", target),
            Step::WaitUrl { url, .. } => match url {
                UrlMatch::Exact(u) => format!("wait_url:{}", u),
                UrlMatch::Pattern { pattern } => format!("wait_url:/{}/", pattern),
            },
            Step::AssertVisible { target } => format!("assert_visible:{}", target),
            Step::Settle { .. } => "settle".to_string(),
            Step::Activate { email } => format!("activate:{}", email),
            Step::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }

    fn substitute(&self, email: &str) -> Step {
        let sub = |s: &str| s.replace(EMAIL_PLACEHOLDER, email);
        match self {
            Step::Navigate { path } => Step::Navigate { path: sub(path) },
            Step::Fill { target, value } => Step::Fill {
                target: target.clone(),
                value: sub(value),
            },
            Step::WaitUrl { url, timeout_ms } => Step::WaitUrl {
                url: match url {
                    UrlMatch::Exact(u) => UrlMatch::Exact(sub(u)),
                    UrlMatch::Pattern { pattern } => UrlMatch::Pattern {
                        pattern: pattern.replace(EMAIL_PLACEHOLDER, &regex::escape(email)),
                    },
                },
                timeout_ms: *timeout_ms,
            },
            Step::Activate { email: e } => Step::Activate { email: sub(e) },
            Step::Log { message } => Step::Log { message: sub(message) },
            other => other.clone(),
        }
    }

    fn uses_email(&self) -> bool {
        match self {
            Step::Navigate { path } => path.contains(EMAIL_PLACEHOLDER),
            Step::Fill { value, .. } => value.contains(EMAIL_PLACEHOLDER),
            Step::WaitUrl { url, .. } => match url {
                UrlMatch::Exact(u) => u.contains(EMAIL_PLACEHOLDER),
                UrlMatch::Pattern { pattern } => pattern.contains(EMAIL_PLACEHOLDER),
            },
            Step::Activate { email } => email.contains(EMAIL_PLACEHOLDER),
            Step::Log { message } => message.contains(EMAIL_PLACEHOLDER),
            _ => false,
        }
    }

    fn target(&self) -> Option<&Locator> {
        match self {
            Step::Fill { target, .. }
            | Step::Click { target, .. }
            | Step::WaitVisible { target, .. }
            | Step::AssertVisible { target } => Some(target),
            _ => None,
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> VerifyResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> VerifyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            VerifyError::InvalidScenario(msg) => {
                VerifyError::InvalidScenario(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Load all scenarios from a directory, sorted by file path
    pub fn load_all(dir: &Path) -> VerifyResult<Vec<Self>> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn error_path(&self) -> PathBuf {
        self.evidence
            .error_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-error.png", self.name)))
    }

    /// Replace `{email}` in every step. Returns the scenario unchanged when
    /// no email is supplied.
    pub fn with_email(&self, email: Option<&str>) -> Scenario {
        let mut resolved = self.clone();
        if let Some(email) = email {
            resolved.steps = self.steps.iter().map(|s| s.substitute(email)).collect();
        }
        resolved
    }

    pub fn validate(&self) -> VerifyResult<()> {
        let invalid = |msg: String| Err(VerifyError::InvalidScenario(msg));

        if self.name.trim().is_empty() {
            return invalid("scenario name is empty".into());
        }
        if !self.start_path.starts_with('/') {
            return invalid(format!("{}: start_path must begin with '/'", self.name));
        }
        for path in [Some(self.evidence.path.clone()), self.evidence.error_path.clone()]
            .into_iter()
            .flatten()
        {
            if path.extension().map(|e| e != "png").unwrap_or(true) {
                return invalid(format!(
                    "{}: evidence path {} must be a .png file",
                    self.name,
                    path.display()
                ));
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            let at = format!("{} step {} ({})", self.name, i + 1, step.describe());
            if let Some(target) = step.target() {
                if target.is_empty() {
                    return invalid(format!("{}: empty locator", at));
                }
                if target.to_string().contains(EMAIL_PLACEHOLDER) {
                    return invalid(format!(
                        "{}: {} is not supported in locators",
                        at, EMAIL_PLACEHOLDER
                    ));
                }
            }
            match step {
                Step::WaitUrl { url: UrlMatch::Pattern { pattern }, .. } => {
                    if let Err(e) = Regex::new(&pattern.replace(EMAIL_PLACEHOLDER, "")) {
                        return invalid(format!("{}: bad URL pattern: {}", at, e));
                    }
                }
                Step::Navigate { path } if !path.starts_with('/') => {
                    return invalid(format!("{}: path must begin with '/'", at));
                }
                _ => {}
            }

            let timeout = match step {
                Step::Click { timeout_ms, .. } => *timeout_ms,
                Step::WaitVisible { timeout_ms, .. }
                | Step::WaitUrl { timeout_ms, .. }
                | Step::Settle { timeout_ms } => Some(*timeout_ms),
                _ => None,
            };
            if timeout == Some(0) {
                return invalid(format!("{}: timeout must be greater than zero", at));
            }

            if step.uses_email() && self.unique_email.is_none() {
                return invalid(format!(
                    "{}: uses {} but no unique_email is configured",
                    at, EMAIL_PLACEHOLDER
                ));
            }
        }

        Ok(())
    }
}

/// Join a base URL and an absolute path without doubling the slash.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
