use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use sr_lab_abstract::ProtocolConfig;
use sr_lab_simulator::SimulationReport;
use sr_lab_simulator::scenario_runner::{self, EndpointPair};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grader for SR lab scenarios")]
struct Args {
    /// A scenario TOML file, or a directory of them.
    #[arg(long)]
    scenario: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("sr-lab-eval-host starting...");

    let scenarios = collect_scenarios(&args.scenario)?;
    anyhow::ensure!(
        !scenarios.is_empty(),
        "no scenario files found at {}",
        args.scenario.display()
    );

    let mut failed = Vec::new();
    for path in &scenarios {
        match scenario_runner::run_scenario(path, endpoints) {
            Ok(report) => {
                info!("PASS {}", path.display());
                log_summary(&report);
            }
            Err(e) => {
                error!("FAIL {}: {:#}", path.display(), e);
                failed.push(path.display().to_string());
            }
        }
    }

    info!(
        "{} passed, {} failed",
        scenarios.len() - failed.len(),
        failed.len()
    );
    if !failed.is_empty() {
        anyhow::bail!("failing scenarios: {}", failed.join(", "));
    }
    Ok(())
}

fn endpoints(config: &ProtocolConfig) -> Result<EndpointPair> {
    Ok((
        sr_lab_protocol::sender(config)?,
        sr_lab_protocol::receiver(config)?,
    ))
}

fn collect_scenarios(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to list scenario directory {}", path.display()))?
    {
        let entry_path = entry?.path();
        if entry_path.extension().is_some_and(|ext| ext == "toml") {
            found.push(entry_path);
        }
    }
    found.sort();
    Ok(found)
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Simulation duration: {} | segments sent: {} | deliveries: {}",
        report.duration,
        report.sender_packet_count,
        report.delivered_data.len()
    );
}
