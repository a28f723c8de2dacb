//! agenda-verify - browser-driven UI verification for the agenda web app

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agenda_verify::activation::ActivationHelper;
use agenda_verify::catalog;
use agenda_verify::config::ServeConfig;
use agenda_verify::driver::Browser;
use agenda_verify::server::DevServer;
use agenda_verify::visual::BaselineStore;
use agenda_verify::{Scenario, ScenarioRunner, VerifyConfig, VerifyError, VerifyResult};

#[derive(Parser, Debug)]
#[command(name = "agenda-verify")]
#[command(about = "Browser-driven UI verification scenarios for the agenda web app")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./verify.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the running app
    #[arg(long, env = "AGENDA_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Directory evidence screenshots are written to
    #[arg(long, env = "AGENDA_ARTIFACT_DIR", global = true)]
    artifact_dir: Option<PathBuf>,

    /// App checkout providing node_modules and the activation helper
    #[arg(long, env = "AGENDA_PROJECT_DIR", global = true)]
    project_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run scenarios (all built-in ones when none are named)
    Run(RunArgs),

    /// List available scenarios
    List {
        /// Also load YAML scenarios from this directory
        #[arg(short, long)]
        specs: Option<PathBuf>,
    },

    /// Run the activation helper for an email, outside any scenario
    Activate { email: String },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scenario names to run
    names: Vec<String>,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Load YAML scenarios from this directory
    #[arg(short, long)]
    specs: Option<PathBuf>,

    /// Browser to use
    #[arg(long, value_enum)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Start the dev server with this shell command before running
    #[arg(long)]
    serve: Option<String>,

    /// Do not check that the app is reachable first
    #[arg(long)]
    skip_health_check: bool,

    /// Compare evidence against baselines in this directory
    #[arg(long)]
    baselines: Option<PathBuf>,

    /// Replace baselines with this run's evidence
    #[arg(long, requires = "baselines")]
    update_baselines: bool,

    /// Visual diff threshold (percentage of pixels)
    #[arg(long, default_value = "0.5")]
    visual_threshold: f64,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(cli)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<bool> {
    let mut config = VerifyConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(dir) = cli.artifact_dir {
        config.artifact_dir = dir;
    }
    if let Some(dir) = cli.project_dir {
        config.project_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::List { specs } => {
            for scenario in collect_scenarios(specs.as_deref())? {
                println!(
                    "{:<20} [{}] {}",
                    scenario.name,
                    scenario.tags.join(","),
                    scenario.description
                );
            }
            Ok(true)
        }
        Commands::Activate { email } => {
            let helper = ActivationHelper::new(&config.activation, &config.project_dir);
            let output = helper.activate(&email).await?;
            println!("{}", output);
            Ok(true)
        }
    }
}

async fn run(mut config: VerifyConfig, args: RunArgs) -> anyhow::Result<bool> {
    if let Some(browser) = args.browser {
        config.browser.kind = browser;
    }
    if args.headed {
        config.browser.headless = false;
    }
    if args.skip_health_check {
        config.health.skip = true;
    }
    if let Some(command) = args.serve {
        config.serve = Some(ServeConfig { command });
    }
    config.validate()?;

    let all = collect_scenarios(args.specs.as_deref())?;
    let selected = select(all, &args.names, args.tag.as_deref())?;
    if selected.is_empty() {
        bail!("no scenarios selected");
    }

    // Held until the end of the run; dropping it stops the server.
    let _server = match &config.serve {
        Some(serve) => Some(
            DevServer::start(&serve.command, &config.base_url, config.health.timeout())
                .await
                .context("starting dev server")?,
        ),
        None => None,
    };

    let mut runner = ScenarioRunner::new(config);
    if let Some(dir) = &args.baselines {
        let store = BaselineStore::new(dir, args.visual_threshold)?;
        runner = runner.with_baselines(store, args.update_baselines);
    }

    runner
        .preflight()
        .await
        .context("target app is not reachable; start it or pass --serve")?;

    let results = runner.run_all(&selected).await;
    runner.write_results(&results)?;
    info!("Done");

    Ok(results.failed == 0)
}

fn collect_scenarios(specs: Option<&std::path::Path>) -> anyhow::Result<Vec<Scenario>> {
    let mut scenarios = catalog::builtin();
    if let Some(dir) = specs {
        let loaded = Scenario::load_all(dir)
            .with_context(|| format!("loading scenarios from {}", dir.display()))?;
        for scenario in loaded {
            if scenarios.iter().any(|s| s.name == scenario.name) {
                bail!("duplicate scenario name '{}'", scenario.name);
            }
            scenarios.push(scenario);
        }
    }
    Ok(scenarios)
}

fn select(all: Vec<Scenario>, names: &[String], tag: Option<&str>) -> VerifyResult<Vec<Scenario>> {
    if let Some(missing) = names.iter().find(|name| !all.iter().any(|s| &s.name == *name)) {
        return Err(VerifyError::ScenarioNotFound(missing.clone()));
    }
    let named: Vec<Scenario> = all
        .into_iter()
        .filter(|s| names.is_empty() || names.contains(&s.name))
        .collect();
    Ok(match tag {
        Some(tag) => Scenario::filter_by_tag(&named, tag).into_iter().cloned().collect(),
        None => named,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scenarios: &[Scenario]) -> Vec<&str> {
        scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_select_by_tag() {
        let selected = select(catalog::builtin(), &[], Some("visual")).unwrap();
        assert!(!selected.is_empty());
        assert!(selected.iter().all(|s| s.tags.iter().any(|t| t == "visual")));
    }

    #[test]
    fn test_select_by_name_and_tag() {
        let wanted = vec![catalog::DASHBOARD.to_string(), catalog::LOGIN_PAGE.to_string()];
        let selected = select(catalog::builtin(), &wanted, Some("visual")).unwrap();
        assert_eq!(names(&selected), vec![catalog::LOGIN_PAGE]);
    }

    #[test]
    fn test_unknown_scenario_name() {
        let err = select(catalog::builtin(), &["nope".to_string()], None).unwrap_err();
        assert!(matches!(err, VerifyError::ScenarioNotFound(name) if name == "nope"));
    }
}
