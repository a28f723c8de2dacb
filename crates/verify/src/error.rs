//! Error types for UI verification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Target not reachable at {url} after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("Dev server failed to start: {0}")]
    ServerStartup(String),

    #[error("Node.js not found at '{0}'. Install Node and run: npx playwright install")]
    NodeNotFound(String),

    #[error("Browser driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Browser driver exited unexpectedly")]
    DriverExited,

    #[error("Timeout waiting for {what} after {timeout_ms} ms")]
    LocatorTimeout { what: String, timeout_ms: u64 },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Activation helper failed ({status}): {stderr}")]
    ActivationFailed { status: String, stderr: String },

    #[error("Scenario error: {0}")]
    InvalidScenario(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("Baseline not found: {0}")]
    BaselineNotFound(String),

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

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VerifyError {
    /// Classify this error into the closed set of scenario failure kinds.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            VerifyError::LocatorTimeout { .. } => FailureKind::LocatorTimeout,
            VerifyError::AssertionFailed(_) | VerifyError::ScreenshotMismatch { .. } => {
                FailureKind::AssertionFailure
            }
            VerifyError::ActivationFailed { .. } => FailureKind::SubprocessFailure,
            _ => FailureKind::Unknown,
        }
    }
}

/// Why a scenario failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An element was not found or never reached the wanted state in time.
    LocatorTimeout,
    /// A URL, text or visual check did not hold.
    AssertionFailure,
    /// The activation helper could not be spawned or exited non-zero.
    SubprocessFailure,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::LocatorTimeout => "locator timeout",
            FailureKind::AssertionFailure => "assertion failure",
            FailureKind::SubprocessFailure => "subprocess failure",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        let timeout = VerifyError::LocatorTimeout {
            what: "heading \"Dashboard\"".into(),
            timeout_ms: 15000,
        };
        assert_eq!(timeout.failure_kind(), FailureKind::LocatorTimeout);

        let helper = VerifyError::ActivationFailed {
            status: "exit status: 1".into(),
            stderr: "User not found".into(),
        };
        assert_eq!(helper.failure_kind(), FailureKind::SubprocessFailure);

        assert_eq!(
            VerifyError::AssertionFailed("url".into()).failure_kind(),
            FailureKind::AssertionFailure
        );
        assert_eq!(VerifyError::DriverExited.failure_kind(), FailureKind::Unknown);
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::SubprocessFailure).unwrap();
        assert_eq!(json, "\"subprocess_failure\"");
    }
}
