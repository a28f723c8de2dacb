//! Agenda UI verification
//!
//! Drives a headless browser through user journeys against a running
//! instance of the agenda web app and keeps a screenshot of the final
//! state as evidence:
//! - Checks the target is reachable before launching anything
//! - Controls Playwright through a Node driver process over JSON lines
//! - Runs built-in scenarios or declarative YAML ones
//! - Activates freshly created accounts through an external helper
//! - Optionally compares evidence against approved baselines
//!
//! # Scenario lifecycle
//!
//! ```text
//! Init -> Navigating -> Interacting -> Waiting(timeout) -> Captured | Failed -> Closed
//! ```
//!
//! `Closed` follows both terminal states: the browser session is released
//! whether the scenario passed or not. A failed scenario leaves an error
//! screenshot behind instead of the success one.

pub mod activation;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod locator;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod visual;

pub use config::VerifyConfig;
pub use error::{FailureKind, VerifyError, VerifyResult};
pub use locator::Locator;
pub use runner::{ScenarioReport, ScenarioRunner, SuiteReport};
pub use scenario::{Scenario, Step};
