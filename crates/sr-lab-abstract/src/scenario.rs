use crate::config::{ProtocolConfig, SimConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub protocol: ProtocolConfigOverride,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
    pub max_time: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.max_time {
            config.max_time = Some(v);
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProtocolConfigOverride {
    pub window_size: Option<u32>,
    pub seq_space: Option<u32>,
    pub timeout: Option<u64>,
}

impl ProtocolConfigOverride {
    pub fn apply_to(&self, config: &mut ProtocolConfig) {
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.seq_space {
            config.seq_space = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application sends data at a specific time
    AppSend { time: u64, data: String },
    /// Application sends `count` letter-filled messages, one every `interval`
    AppBurst { time: u64, count: usize, interval: u64 },
    /// Deterministically drop the first data segment sent with given seq number
    DropNextFromSenderSeq { seq: u32 },
    /// Deterministically drop the first ACK sent by Receiver with given ack number
    DropNextFromReceiverAck { ack: u32 },
    /// Deterministically corrupt the first data segment sent with given seq number
    CorruptNextFromSenderSeq { seq: u32 },
    /// Deterministically corrupt the first ACK sent by Receiver with given ack number
    CorruptNextFromReceiverAck { ack: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Assert that specific data was delivered to the application layer
    DataDelivered { data: String },
    /// Assert that deliveries equal the accepted application sends, in order
    DeliveredInOrder,
    /// Assert that the number of deliveries is within range
    DeliveredCount { min: usize, max: Option<usize> },
    /// Assert that the total number of segments sent by Sender is within range
    SenderPacketCount { min: u32, max: Option<u32> },
    /// Assert how many application sends were rejected for lack of window space
    WindowFullCount { min: u64, max: Option<u64> },
    /// Assert that simulation finishes within time
    MaxDuration { ms: u64 },
}
