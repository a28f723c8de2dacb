//! External account activation helper

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ActivationConfig;
use crate::error::{VerifyError, VerifyResult};

/// Runs the out-of-process helper that flips a pending account to active.
///
/// The helper is invoked as `<program> <args...> <email>` from the project
/// directory. Exit code 0 is success; anything else aborts the scenario.
#[derive(Debug, Clone)]
pub struct ActivationHelper {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ActivationHelper {
    pub fn new(config: &ActivationConfig, working_dir: &Path) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: working_dir.to_path_buf(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Activate `email`, returning the helper's captured stdout.
    pub async fn activate(&self, email: &str) -> VerifyResult<String> {
        info!("Activating user: {}", email);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(email)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| VerifyError::ActivationFailed {
                status: "timed out".to_string(),
                stderr: format!("no exit within {:?}", self.timeout),
            })?
            .map_err(|e| VerifyError::ActivationFailed {
                status: "spawn failed".to_string(),
                stderr: format!("{}: {}", self.program, e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(VerifyError::ActivationFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            debug!("Activation helper stderr: {}", stderr);
        }
        info!("Activation helper output: {}", stdout);
        Ok(stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn helper(program: &str, args: &[&str]) -> ActivationHelper {
        ActivationHelper::new(
            &ActivationConfig {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                timeout_secs: 5,
            },
            Path::new("."),
        )
    }

    #[tokio::test]
    async fn test_email_is_passed_as_last_argument() {
        let out = helper("echo", &["activated"]).activate("a@b.com").await.unwrap();
        assert_eq!(out, "activated a@b.com");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_subprocess_failure() {
        let err = helper("sh", &["-c", "echo 'User not found' >&2; exit 1", "helper"])
            .activate("missing@b.com")
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::SubprocessFailure);
        assert!(err.to_string().contains("User not found"));
    }

    #[tokio::test]
    async fn test_missing_program_is_subprocess_failure() {
        let err = helper("/nonexistent/activate", &[]).activate("a@b.com").await.unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::SubprocessFailure);
    }

    #[tokio::test]
    async fn test_hung_helper_times_out() {
        let mut h = helper("sh", &["-c", "sleep 10", "helper"]);
        h.timeout = Duration::from_millis(200);
        let err = h.activate("a@b.com").await.unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::SubprocessFailure);
    }
}
