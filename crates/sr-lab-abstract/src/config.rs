use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::window::SequenceSpace;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
    /// Events scheduled after this time are never processed.
    pub max_time: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            min_latency: 1,
            max_latency: 7,
            seed: 0,
            max_time: Some(100_000),
        }
    }
}

/// Window and timer parameters shared by both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub window_size: u32,
    pub seq_space: u32,
    /// Retransmission timeout in simulation time units.
    pub timeout: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            window_size: 6,
            seq_space: 64,
            timeout: 16,
        }
    }
}

impl ProtocolConfig {
    pub fn sequence_space(&self) -> Result<SequenceSpace, ConfigError> {
        SequenceSpace::new(self.window_size, self.seq_space)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    EmptyWindow,
    #[error("window size {window} is too large to validate")]
    WindowTooLarge { window: u32 },
    #[error(
        "sequence space {seq_space} is too small for window {window}: need at least {required}"
    )]
    SequenceSpaceTooSmall {
        window: u32,
        seq_space: u32,
        required: u32,
    },
}
