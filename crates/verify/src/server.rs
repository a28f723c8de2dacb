//! Target app reachability and optional dev server management

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{VerifyError, VerifyResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `base_url` until it answers with a non-server-error status.
///
/// Any HTTP response below 500 counts as reachable; a dev server that
/// redirects or serves a 404 for `/` is still up.
pub async fn wait_until_reachable(base_url: &str, timeout_duration: Duration) -> VerifyResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(base_url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("Target is reachable at {}", base_url);
                return Ok(());
            }
            Ok(resp) => {
                warn!("Health check returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} to respond...", base_url);
                }
                // Connection refused is expected while the server is starting
                if !e.is_connect() {
                    warn!("Health check error: {}", e);
                }
            }
        }

        if start.elapsed() + POLL_INTERVAL >= timeout_duration {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(VerifyError::TargetUnreachable {
        url: base_url.to_string(),
        attempts,
    })
}

/// Handle to a dev server started by the runner
pub struct DevServer {
    child: Child,
    command: String,
}

impl DevServer {
    /// Start `command` through the shell and wait for `base_url` to answer.
    pub async fn start(command: &str, base_url: &str, startup_timeout: Duration) -> VerifyResult<Self> {
        info!("Starting dev server: {}", command);

        let child = shell(command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VerifyError::ServerStartup(format!("failed to spawn '{}': {}", command, e)))?;

        let mut server = DevServer {
            child,
            command: command.to_string(),
        };

        if let Err(e) = wait_until_reachable(base_url, startup_timeout).await {
            server.stop();
            return Err(VerifyError::ServerStartup(format!("{} ({})", command, e)));
        }

        Ok(server)
    }

    /// Stop the server: SIGTERM first, then kill.
    pub fn stop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        info!("Stopping dev server '{}' (pid: {})", self.command, self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            // The shell runs in its own process group, so the whole tree
            // (npm, vite, ...) receives the signal.
            let pgid = Pid::from_raw(-(self.child.id() as i32));
            if kill(pgid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        // bind then drop: nothing listens on the port afterwards
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_unreachable_target_times_out() {
        let url = format!("http://127.0.0.1:{}", closed_port());
        let start = Instant::now();
        let err = wait_until_reachable(&url, Duration::from_millis(600)).await.unwrap_err();
        assert!(matches!(err, VerifyError::TargetUnreachable { attempts, .. } if attempts >= 1));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dev_server_that_never_listens_fails_startup() {
        let url = format!("http://127.0.0.1:{}", closed_port());
        let err = DevServer::start("sleep 30", &url, Duration::from_millis(600))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VerifyError::ServerStartup(_)));
    }
}
