use serde::Serialize;
use sr_lab_abstract::SimConfig;
use std::collections::HashMap;

use crate::engine::LinkEventSummary;

/// What the unreliable channel did to the segments handed to it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    pub lost: u32,
    pub corrupted: u32,
    /// Segments scheduled for arrival, corrupted or not.
    pub delivered_segments: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration: u64,
    pub delivered_data: Vec<Vec<u8>>,
    pub app_sends: usize,
    pub sender_packet_count: u32,
    pub receiver_packet_count: u32,
    pub channel: ChannelStats,
    /// Events left unprocessed when the run stopped.
    pub pending_events: usize,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    /// Latest value of a metric, or 0 if it was never recorded.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics
            .get(name)
            .and_then(|series| series.last())
            .map_or(0.0, |&(_, value)| value)
    }
}
