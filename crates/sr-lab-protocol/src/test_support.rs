use sr_lab_abstract::{Segment, SystemContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Start(u64),
    Stop,
}

/// Records every side effect an endpoint asks for.
#[derive(Default)]
pub struct RecordingContext {
    pub transmitted: Vec<Segment>,
    pub timer_ops: Vec<TimerOp>,
    pub delivered: Vec<Vec<u8>>,
    pub logs: Vec<String>,
    pub metrics: Vec<(String, f64)>,
}

impl RecordingContext {
    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.transmitted.clear();
        self.timer_ops.clear();
        self.delivered.clear();
        self.logs.clear();
        self.metrics.clear();
    }

    pub fn transmitted_seqs(&self) -> Vec<u32> {
        self.transmitted.iter().map(Segment::seq_num).collect()
    }

    pub fn transmitted_acks(&self) -> Vec<u32> {
        self.transmitted.iter().filter_map(Segment::ack_num).collect()
    }
}

impl SystemContext for RecordingContext {
    fn transmit(&mut self, segment: Segment) {
        self.transmitted.push(segment);
    }

    fn start_timer(&mut self, delay: u64) {
        self.timer_ops.push(TimerOp::Start(delay));
    }

    fn stop_timer(&mut self) {
        self.timer_ops.push(TimerOp::Stop);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.delivered.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        0
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.metrics.push((name.to_string(), value));
    }
}
