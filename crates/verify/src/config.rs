//! Runner configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::driver::Browser;
use crate::error::{VerifyError, VerifyResult};
use crate::scenario::Viewport;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "verify.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Base URL of the app under test
    pub base_url: String,

    /// Directory evidence screenshots are written to
    pub artifact_dir: PathBuf,

    /// Directory of the app checkout; `playwright` is resolved from its
    /// node_modules and the activation helper runs from here
    pub project_dir: PathBuf,

    /// Browser settings
    pub browser: BrowserConfig,

    /// Activation helper
    pub activation: ActivationConfig,

    /// Upfront reachability check
    pub health: HealthConfig,

    /// Optional dev server started before any scenario
    pub serve: Option<ServeConfig>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173".to_string(),
            artifact_dir: PathBuf::from("jules-scratch/verification"),
            project_dir: PathBuf::from("."),
            browser: BrowserConfig::default(),
            activation: ActivationConfig::default(),
            health: HealthConfig::default(),
            serve: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: Browser,
    pub headless: bool,
    pub viewport: Viewport,

    /// Node.js executable used to run the Playwright driver
    pub node_binary: String,

    /// Time allowed for the browser to launch
    pub launch_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            node_binary: "node".to_string(),
            launch_timeout_secs: 30,
        }
    }
}

impl BrowserConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Program to run; the email is appended after `args`
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["jules-scratch/verification/activate_user.mjs".to_string()],
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Skip the check entirely
    pub skip: bool,
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            skip: false,
            timeout_secs: 30,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Shell command starting the dev server, e.g. `npm run dev`
    pub command: String,
}

impl VerifyConfig {
    /// Load configuration from `path`, or from `verify.toml` in the working
    /// directory if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> VerifyResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> VerifyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VerifyError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> VerifyResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> VerifyResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(VerifyError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        let vp = self.browser.viewport;
        if vp.width == 0 || vp.height == 0 {
            return Err(VerifyError::InvalidConfig(format!(
                "viewport must be non-zero, got {}x{}",
                vp.width, vp.height
            )));
        }
        if self.activation.program.trim().is_empty() {
            return Err(VerifyError::InvalidConfig(
                "activation.program is empty".to_string(),
            ));
        }
        if let Some(serve) = &self.serve {
            if serve.command.trim().is_empty() {
                return Err(VerifyError::InvalidConfig("serve.command is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Resolve a path relative to the artifact directory.
    pub fn artifact_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.artifact_dir.join(relative)
        }
    }
}
