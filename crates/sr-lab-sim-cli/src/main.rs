use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use sr_lab_abstract::{ProtocolConfig, SimConfig};
use sr_lab_simulator::scenario_runner::{self, EndpointPair};
use sr_lab_simulator::{SimulationReport, Simulator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Selective-Repeat lab simulator")]
struct Args {
    /// Load a scenario from disk instead of the generated workload.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Number of application messages to generate.
    #[arg(long, default_value_t = 20)]
    messages: usize,

    /// Time between generated messages.
    #[arg(long, default_value_t = 10)]
    interval: u64,

    /// Probability that a segment is lost.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Probability that a segment is corrupted.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long)]
    min_latency: Option<u64>,
    #[arg(long)]
    max_latency: Option<u64>,

    /// Stop processing events after this time.
    #[arg(long)]
    max_time: Option<u64>,

    #[arg(long)]
    window: Option<u32>,
    #[arg(long)]
    seq_space: Option<u32>,

    /// Retransmission timeout.
    #[arg(long)]
    timeout: Option<u64>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("sr-lab-sim-cli starting…");

    let report = if let Some(path) = &args.scenario {
        scenario_runner::run_scenario(path, endpoints)?
    } else {
        run_default_sim(&args)?
    };
    log_summary(&report);

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

impl Args {
    fn sim_config(&self) -> SimConfig {
        let defaults = SimConfig::default();
        SimConfig {
            loss_rate: self.loss,
            corrupt_rate: self.corrupt,
            min_latency: self.min_latency.unwrap_or(defaults.min_latency),
            max_latency: self.max_latency.unwrap_or(defaults.max_latency),
            seed: self.seed,
            max_time: self.max_time.or(defaults.max_time),
        }
    }

    fn protocol_config(&self) -> ProtocolConfig {
        let defaults = ProtocolConfig::default();
        ProtocolConfig {
            window_size: self.window.unwrap_or(defaults.window_size),
            seq_space: self.seq_space.unwrap_or(defaults.seq_space),
            timeout: self.timeout.unwrap_or(defaults.timeout),
        }
    }
}

fn endpoints(config: &ProtocolConfig) -> Result<EndpointPair> {
    let sender = sr_lab_protocol::sender(config).context("Invalid protocol configuration")?;
    let receiver = sr_lab_protocol::receiver(config).context("Invalid protocol configuration")?;
    Ok((sender, receiver))
}

fn run_default_sim(args: &Args) -> Result<SimulationReport> {
    let config = args.sim_config();
    anyhow::ensure!(
        config.min_latency <= config.max_latency,
        "--min-latency must not exceed --max-latency"
    );
    let (sender, receiver) = endpoints(&args.protocol_config())?;
    let mut sim = Simulator::new(config, sender, receiver);
    sim.schedule_messages(args.messages, 0, args.interval);

    info!(
        "Starting headless simulation of {} messages…",
        args.messages
    );
    sim.run_until_complete();
    info!("Simulation complete.");
    Ok(sim.export_report())
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Duration: {} | app sends: {} | deliveries: {} | window full: {}",
        report.duration,
        report.app_sends,
        report.delivered_data.len(),
        report.metric("window_full")
    );
    info!(
        "Segments from sender: {} (retransmissions: {}) | ACKs from receiver: {}",
        report.sender_packet_count,
        report.metric("retransmissions"),
        report.receiver_packet_count
    );
    info!(
        "Channel: {} lost, {} corrupted | {} events still pending",
        report.channel.lost, report.channel.corrupted, report.pending_events
    );
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
