//! vpnqa - run the VPN client QA session
//!
//! Loads the harness configuration, expands the connection matrix and runs
//! every selected case against the client installed on this host.

use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use vpnqa::{
    config::QaConfig,
    error::Result,
    logging,
    matrix::{connection_scenarios, filter_scenarios, Scenario},
    runner::{Harness, RunPolicy, Runner},
};

#[derive(Parser, Debug)]
#[command(name = "vpnqa")]
#[command(about = "End-to-end QA session for a command-line VPN client")]
#[command(version)]
struct Args {
    /// Configuration file; defaults are used when it does not exist
    #[arg(short, long, default_value = "vpnqa.toml")]
    config: PathBuf,

    /// Run only cases whose name contains this text
    #[arg(short = 'k', long)]
    filter: Option<String>,

    /// Print the selected case names and exit
    #[arg(long)]
    list: bool,

    /// Do not start the background connectivity monitor
    #[arg(long)]
    no_monitor: bool,

    /// Enable debug output, including every command run
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };
    logging::init(&config.logging.level, args.verbose);

    info!("Starting {} v{}", vpnqa::NAME, vpnqa::VERSION);

    let mut scenarios = connection_scenarios(&config.matrix);
    scenarios.push(Scenario::DaemonLoop {
        iterations: config.runner.loop_iterations,
    });
    let scenarios = filter_scenarios(scenarios, args.filter.as_deref());

    if args.list {
        for scenario in &scenarios {
            println!("{}", scenario.name());
        }
        return;
    }

    if scenarios.is_empty() {
        warn!("No cases selected");
        return;
    }
    info!("Selected {} cases", scenarios.len());

    match run(&config, scenarios, !args.no_monitor).await {
        Ok(true) => info!("Session passed"),
        Ok(false) => {
            error!("Session failed");
            process::exit(1);
        }
        Err(e) => {
            error!("Session aborted: {e}");
            process::exit(2);
        }
    }
}

fn load_config(path: &Path) -> Result<QaConfig> {
    let config = if path.exists() {
        QaConfig::from_file(path)?
    } else {
        QaConfig::default()
    };
    config.validate()?;
    Ok(config)
}

async fn run(config: &QaConfig, scenarios: Vec<Scenario>, monitor: bool) -> Result<bool> {
    let harness = Arc::new(Harness::from_config(config)?);
    let runner = Runner::new(harness, RunPolicy::from(&config.runner));
    let report = runner.run_session(config, scenarios, monitor).await?;

    for case in report.cases.iter().filter(|c| !c.outcome.is_passed()) {
        error!("{} ({} attempts): {}", case.name, case.attempts, case.outcome);
    }
    Ok(report.is_success())
}
