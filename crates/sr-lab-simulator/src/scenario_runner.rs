use anyhow::{Context, anyhow, bail};
use sr_lab_abstract::{
    Message, ProtocolConfig, SimConfig, TestAction, TestAssertion, TestScenario,
    TransportProtocol,
};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::engine::Simulator;
use crate::trace::SimulationReport;

pub type EndpointPair = (Box<dyn TransportProtocol>, Box<dyn TransportProtocol>);

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    parse_scenario(&content)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))
}

pub fn parse_scenario(content: &str) -> anyhow::Result<TestScenario> {
    toml::from_str(content).context("Invalid scenario TOML")
}

/// Load a scenario from disk and run it with endpoints built by `endpoints`.
pub fn run_scenario<F>(scenario_path: &Path, endpoints: F) -> anyhow::Result<SimulationReport>
where
    F: FnOnce(&ProtocolConfig) -> anyhow::Result<EndpointPair>,
{
    let scenario = load_scenario(scenario_path)?;
    run(&scenario, endpoints)
}

/// Build the simulator a scenario describes, without running it.
pub fn build(scenario: &TestScenario, endpoints: EndpointPair) -> Simulator {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    let (sender, receiver) = endpoints;
    let mut sim = Simulator::new(config, sender, receiver);
    configure_actions(&mut sim, &scenario.actions);
    sim
}

pub fn protocol_config(scenario: &TestScenario) -> ProtocolConfig {
    let mut config = ProtocolConfig::default();
    scenario.protocol.apply_to(&mut config);
    config
}

pub fn run<F>(scenario: &TestScenario, endpoints: F) -> anyhow::Result<SimulationReport>
where
    F: FnOnce(&ProtocolConfig) -> anyhow::Result<EndpointPair>,
{
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let protocol = protocol_config(scenario);
    let pair = endpoints(&protocol).context("Failed to build endpoints")?;
    let mut sim = build(scenario, pair);

    // Call init after we've configured the simulator
    sim.init();

    let max_duration = scenario.assertions.iter().find_map(|a| {
        if let TestAssertion::MaxDuration { ms } = a {
            Some(*ms)
        } else {
            None
        }
    });

    while sim.step() {
        if let Some(limit) = max_duration
            && sim.current_time() > limit
        {
            bail!("Test timed out after {} time units", limit);
        }
    }
    if sim.remaining_events() > 0 {
        warn!(
            "Run stopped at the time limit with {} events pending",
            sim.remaining_events()
        );
    }

    for assertion in &scenario.assertions {
        check_assertion(&sim, assertion)?;
    }

    info!("Test Scenario Passed!");
    Ok(sim.export_report())
}

pub fn configure_actions(sim: &mut Simulator, actions: &[TestAction]) {
    for action in actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_app_send(*time, data.as_bytes().to_vec());
            }
            TestAction::AppBurst {
                time,
                count,
                interval,
            } => {
                sim.schedule_messages(*count, *time, *interval);
            }
            TestAction::DropNextFromSenderSeq { seq } => {
                sim.add_drop_sender_seq_once(*seq);
            }
            TestAction::DropNextFromReceiverAck { ack } => {
                sim.add_drop_receiver_ack_once(*ack);
            }
            TestAction::CorruptNextFromSenderSeq { seq } => {
                sim.add_corrupt_sender_seq_once(*seq);
            }
            TestAction::CorruptNextFromReceiverAck { ack } => {
                sim.add_corrupt_receiver_ack_once(*ack);
            }
        }
    }
}

fn check_range<T>(what: &str, actual: T, min: T, max: Option<T>) -> anyhow::Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if actual < min {
        bail!("Assertion Failed: {what} was {actual}, expected min {min}");
    }
    if let Some(max) = max
        && actual > max
    {
        bail!("Assertion Failed: {what} was {actual}, expected max {max}");
    }
    Ok(())
}

fn check_assertion(sim: &Simulator, assertion: &TestAssertion) -> anyhow::Result<()> {
    match assertion {
        TestAssertion::DataDelivered { data } => {
            let expected = Message::from_bytes(data.as_bytes());
            if !sim
                .delivered_data
                .iter()
                .any(|d| d.as_slice() == expected.as_bytes())
            {
                bail!("Assertion Failed: Data {:?} was not delivered", data);
            }
        }
        TestAssertion::DeliveredInOrder => check_in_order(sim)?,
        TestAssertion::DeliveredCount { min, max } => {
            check_range("delivered count", sim.delivered_data.len(), *min, *max)?;
        }
        TestAssertion::SenderPacketCount { min, max } => {
            check_range("sender packet count", sim.sender_packet_count, *min, *max)?;
        }
        TestAssertion::WindowFullCount { min, max } => {
            let count = sim.latest_metric("window_full").unwrap_or(0.0) as u64;
            check_range("window full count", count, *min, *max)?;
        }
        TestAssertion::MaxDuration { .. } => {} // Already checked
    }
    Ok(())
}

/// Deliveries must be exactly the accepted sends, in send order.
fn check_in_order(sim: &Simulator) -> anyhow::Result<()> {
    let sent: Vec<Message> = sim
        .app_sends
        .iter()
        .map(|d| Message::from_bytes(d))
        .collect();
    let mut cursor = 0;
    for (i, delivered) in sim.delivered_data.iter().enumerate() {
        let offset = sent[cursor..]
            .iter()
            .position(|m| m.as_bytes() == delivered.as_slice())
            .ok_or_else(|| {
                anyhow!("Assertion Failed: delivery #{i} does not follow the send order")
            })?;
        cursor += offset + 1;
    }

    let rejected = sim.latest_metric("window_full").unwrap_or(0.0) as usize;
    let accepted = sent.len().saturating_sub(rejected);
    if sim.delivered_data.len() != accepted {
        bail!(
            "Assertion Failed: {} messages delivered but {} were accepted",
            sim.delivered_data.len(),
            accepted
        );
    }
    Ok(())
}
