use crate::trace::{ChannelStats, SimulationReport};
use rand::Rng;
use serde::Serialize;
use sr_lab_abstract::{Corruption, Message, PAYLOAD_SIZE, Segment, SimConfig};
use sr_lab_abstract::{SystemContext, TransportProtocol};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info};

/// Value written over a header field by a corrupting channel.
const CORRUPT_FIELD_VALUE: u32 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    SegmentArrival { to: NodeId, segment: Segment },
    TimerExpiry { node: NodeId, generation: u64 },
    AppSend { data: Vec<u8> },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of important link-layer events.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerOp {
    Start(u64),
    Stop,
}

/// Actions buffered during an endpoint's handler
#[derive(Default)]
struct ActionBuffer {
    outgoing: Vec<Segment>,
    timer_ops: Vec<TimerOp>,
    logs: Vec<String>,
    delivered_data: Vec<Vec<u8>>,
    metrics: Vec<(String, f64)>,
}

/// Context implementation passed to an endpoint
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl<'a> SystemContext for ScopedContext<'a> {
    fn transmit(&mut self, segment: Segment) {
        self.buffer.outgoing.push(segment);
    }

    fn start_timer(&mut self, delay: u64) {
        self.buffer.timer_ops.push(TimerOp::Start(delay));
    }

    fn stop_timer(&mut self) {
        self.buffer.timer_ops.push(TimerOp::Stop);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered_data.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

/// Which direction a deterministic fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultTarget {
    /// First data segment from the sender with this seq number.
    SenderSeq(u32),
    /// First ACK from the receiver with this ack number.
    ReceiverAck(u32),
}

impl FaultTarget {
    fn matches(&self, source: NodeId, segment: &Segment) -> bool {
        match (*self, source) {
            (FaultTarget::SenderSeq(seq), NodeId::Sender) => {
                !segment.is_ack() && segment.seq_num() == seq
            }
            (FaultTarget::ReceiverAck(ack), NodeId::Receiver) => segment.ack_num() == Some(ack),
            _ => false,
        }
    }
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: rand::rngs::StdRng,

    pub sender: Box<dyn TransportProtocol>,
    pub receiver: Box<dyn TransportProtocol>,

    // Stats for Grader
    pub delivered_data: Vec<Vec<u8>>,
    pub sender_packet_count: u32,
    pub receiver_packet_count: u32,
    pub channel: ChannelStats,

    /// Application messages handed to the sender, in order.
    pub app_sends: Vec<Vec<u8>>,

    /// Arbitrary time-series metrics recorded via `SystemContext::record_metric`
    /// Key: metric name (e.g., "in_flight"), Value: Vec<(time, value)>
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    // Deterministic one-shot fault injection
    drop_once: Vec<FaultTarget>,
    corrupt_once: Vec<FaultTarget>,

    /// Timeline of link events (drops, corruptions, sends, deliveries).
    pub link_events: Vec<LinkEventSummary>,

    /// Timer generation per node. Starting or stopping a timer bumps it, so
    /// any expiry scheduled under an older generation is stale.
    timer_generations: HashMap<NodeId, u64>,

    /// Latest scheduled arrival per destination; keeps each direction FIFO.
    last_arrival: HashMap<NodeId, u64>,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        sender: Box<dyn TransportProtocol>,
        receiver: Box<dyn TransportProtocol>,
    ) -> Self {
        use rand::SeedableRng;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            sender,
            receiver,
            delivered_data: Vec::new(),
            sender_packet_count: 0,
            receiver_packet_count: 0,
            channel: ChannelStats::default(),
            app_sends: Vec::new(),
            metrics: HashMap::new(),
            drop_once: Vec::new(),
            corrupt_once: Vec::new(),
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
            last_arrival: HashMap::new(),
        }
    }

    /// Register a deterministic fault: drop the first data segment sent by Sender whose seq equals `seq`.
    pub fn add_drop_sender_seq_once(&mut self, seq: u32) {
        self.drop_once.push(FaultTarget::SenderSeq(seq));
    }

    /// Register a deterministic fault: drop the first ACK sent by Receiver whose ack equals `ack`.
    pub fn add_drop_receiver_ack_once(&mut self, ack: u32) {
        self.drop_once.push(FaultTarget::ReceiverAck(ack));
    }

    /// Register a deterministic fault: corrupt the first data segment sent by Sender whose seq equals `seq`.
    pub fn add_corrupt_sender_seq_once(&mut self, seq: u32) {
        self.corrupt_once.push(FaultTarget::SenderSeq(seq));
    }

    /// Register a deterministic fault: corrupt the first ACK sent by Receiver whose ack equals `ack`.
    pub fn add_corrupt_receiver_ack_once(&mut self, ack: u32) {
        self.corrupt_once.push(FaultTarget::ReceiverAck(ack));
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Return a slice of (time, value) samples for a named metric, if present.
    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    /// Most recent value recorded for a metric.
    pub fn latest_metric(&self, name: &str) -> Option<f64> {
        self.metric_series(name)
            .and_then(|series| series.last())
            .map(|&(_, value)| value)
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_app_send(&mut self, time: u64, data: Vec<u8>) {
        self.push_event(time, EventType::AppSend { data });
    }

    /// Schedule `count` letter-filled messages, the first at `start` and then
    /// one every `interval`.
    pub fn schedule_messages(&mut self, count: usize, start: u64, interval: u64) {
        for i in 0..count {
            let time = start + interval * i as u64;
            self.schedule_app_send(time, Message::filled(i).as_bytes().to_vec());
        }
    }

    pub fn init(&mut self) {
        for node in [NodeId::Sender, NodeId::Receiver] {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                self.endpoint(node).init(&mut ctx);
            }
            self.process_actions(node, buffer);
        }
    }

    fn endpoint(&mut self, node: NodeId) -> &mut dyn TransportProtocol {
        match node {
            NodeId::Sender => self.sender.as_mut(),
            NodeId::Receiver => self.receiver.as_mut(),
        }
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Process the next event. Returns false once the queue is empty or the
    /// next event lies beyond `max_time`.
    pub fn step(&mut self) -> bool {
        if let (Some(limit), Some(next)) = (self.config.max_time, self.peek_next_event_time())
            && next > limit
        {
            debug!("Next event at {} is past the time limit {}", next, limit);
            return false;
        }
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        let (node, buffer) = match event.event_type {
            EventType::SegmentArrival { to, segment } => {
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.endpoint(to).on_segment(&mut ctx, segment);
                }
                (to, buffer)
            }
            EventType::TimerExpiry { node, generation } => {
                let current = self.timer_generations.get(&node).copied().unwrap_or(0);
                if current != generation {
                    debug!("Skipping stale timer event for {:?}", node);
                    return true; // Event processed (by being ignored)
                }
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.endpoint(node).on_timer(&mut ctx);
                }
                (node, buffer)
            }
            EventType::AppSend { data } => {
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.sender.on_app_data(&mut ctx, &data);
                }
                self.app_sends.push(data);
                (NodeId::Sender, buffer)
            }
        };
        self.process_actions(node, buffer);
        true
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration: self.time,
            delivered_data: self.delivered_data.clone(),
            app_sends: self.app_sends.len(),
            sender_packet_count: self.sender_packet_count,
            receiver_packet_count: self.receiver_packet_count,
            channel: self.channel.clone(),
            pending_events: self.event_queue.len(),
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        // First, fold metrics into simulator-wide store
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source_node, log);
        }

        for data in buffer.delivered_data {
            info!("[{:?}] DELIVERED DATA: {} bytes", source_node, data.len());
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!(
                    "[{:?}] DELIVERED {} bytes to application",
                    source_node,
                    data.len()
                ),
            });
            self.delivered_data.push(data);
        }

        // Every start or stop invalidates previously scheduled expiries
        for op in buffer.timer_ops {
            let generation = self.timer_generations.entry(source_node).or_insert(0);
            *generation += 1;
            if let TimerOp::Start(delay) = op {
                let generation = *generation;
                self.push_event(
                    self.time + delay,
                    EventType::TimerExpiry {
                        node: source_node,
                        generation,
                    },
                );
            }
        }

        for segment in buffer.outgoing {
            self.transmit(source_node, segment);
        }
    }

    /// Push one segment through the unreliable channel.
    fn transmit(&mut self, source_node: NodeId, mut segment: Segment) {
        let target_node = source_node.peer();
        match source_node {
            NodeId::Sender => self.sender_packet_count += 1,
            NodeId::Receiver => self.receiver_packet_count += 1,
        }

        if let Some(pos) = self
            .drop_once
            .iter()
            .position(|f| f.matches(source_node, &segment))
        {
            self.drop_once.remove(pos);
            self.channel.lost += 1;
            self.link_event(format!(
                "[{:?}->{:?}] DROP (deterministic) {}",
                source_node,
                target_node,
                describe(&segment)
            ));
            debug!("Deterministically dropping {}", describe(&segment));
            return;
        }

        let forced_corruption = match self
            .corrupt_once
            .iter()
            .position(|f| f.matches(source_node, &segment))
        {
            Some(pos) => {
                self.corrupt_once.remove(pos);
                true
            }
            None => false,
        };

        // 1. Check Loss
        if !forced_corruption && self.rng.random::<f64>() < self.config.loss_rate {
            self.channel.lost += 1;
            self.link_event(format!(
                "[{:?}->{:?}] DROP (random loss) {}",
                source_node,
                target_node,
                describe(&segment)
            ));
            debug!("Segment lost in channel");
            return;
        }

        // 2. Check Corruption
        if forced_corruption || self.rng.random::<f64>() < self.config.corrupt_rate {
            self.channel.corrupted += 1;
            self.link_event(format!(
                "[{:?}->{:?}] CORRUPT {}",
                source_node,
                target_node,
                describe(&segment)
            ));
            let corruption = self.pick_corruption(&segment);
            debug!("Segment corrupted in channel: {:?}", corruption);
            segment = segment.corrupted(corruption);
        }

        // 3. Calculate Latency, never overtaking an earlier segment
        let min_latency = self.config.min_latency;
        let latency = self
            .rng
            .random_range(min_latency..=self.config.max_latency.max(min_latency));
        let earliest = self.last_arrival.get(&target_node).copied().unwrap_or(0);
        let arrival_time = (self.time + latency).max(earliest);
        self.last_arrival.insert(target_node, arrival_time);

        self.link_event(format!(
            "[{:?}->{:?}] SEND {} (arrives at {})",
            source_node,
            target_node,
            describe(&segment),
            arrival_time
        ));
        self.channel.delivered_segments += 1;

        self.push_event(
            arrival_time,
            EventType::SegmentArrival {
                to: target_node,
                segment,
            },
        );
    }

    /// Overwrite one field: the payload three times in four, otherwise the
    /// sequence or ack number. The new value always differs from the old.
    fn pick_corruption(&mut self, segment: &Segment) -> Corruption {
        let roll = self.rng.random::<f64>();
        if roll < 0.75 {
            let index = self.rng.random_range(0..PAYLOAD_SIZE);
            let value = if segment.payload()[index] == b'z' {
                b'Z'
            } else {
                b'z'
            };
            Corruption::PayloadByte { index, value }
        } else if roll < 0.875 {
            Corruption::SeqNum(different_from(segment.seq_num()))
        } else {
            Corruption::AckNum(different_from(segment.ack_field()))
        }
    }

    fn link_event(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }
}

fn different_from(value: u32) -> u32 {
    if value == CORRUPT_FIELD_VALUE {
        CORRUPT_FIELD_VALUE + 1
    } else {
        CORRUPT_FIELD_VALUE
    }
}

fn describe(segment: &Segment) -> String {
    match segment.ack_num() {
        Some(ack) => format!("ack={}", ack),
        None => format!("seq={}", segment.seq_num()),
    }
}

#[cfg(test)]
mod tests {
    use super::Simulator;
    use sr_lab_abstract::{Segment, SimConfig, SystemContext, TransportProtocol};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Observed {
        timer_fired: Vec<u64>,
        arrivals: Vec<(u64, u32)>,
    }

    /// Starts its timer twice on init and stops it when data arrives.
    struct TimerProbe {
        observed: Rc<RefCell<Observed>>,
        stop_on_data: bool,
    }

    impl TransportProtocol for TimerProbe {
        fn init(&mut self, ctx: &mut dyn SystemContext) {
            ctx.start_timer(10);
            // restarting replaces the pending expiry
            ctx.start_timer(20);
        }

        fn on_segment(&mut self, ctx: &mut dyn SystemContext, segment: Segment) {
            self.observed
                .borrow_mut()
                .arrivals
                .push((ctx.now(), segment.seq_num()));
            if self.stop_on_data {
                ctx.stop_timer();
            }
        }

        fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
            self.observed.borrow_mut().timer_fired.push(ctx.now());
        }

        fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
            let seq = data.first().copied().unwrap_or(0) as u32;
            ctx.transmit(Segment::data(seq, [0; 20]));
        }
    }

    fn probe(observed: &Rc<RefCell<Observed>>, stop_on_data: bool) -> Box<TimerProbe> {
        Box::new(TimerProbe {
            observed: Rc::clone(observed),
            stop_on_data,
        })
    }

    #[test]
    fn restarted_timer_fires_once() {
        let sender = Rc::new(RefCell::new(Observed::default()));
        let receiver = Rc::new(RefCell::new(Observed::default()));
        let mut sim = Simulator::new(
            SimConfig::default(),
            probe(&sender, false),
            probe(&receiver, false),
        );
        sim.run_until_complete();
        assert_eq!(sender.borrow().timer_fired, vec![20]);
    }

    #[test]
    fn stopped_timer_never_fires() {
        let sender = Rc::new(RefCell::new(Observed::default()));
        let receiver = Rc::new(RefCell::new(Observed::default()));
        let config = SimConfig {
            min_latency: 1,
            max_latency: 1,
            ..Default::default()
        };
        let mut sim = Simulator::new(config, probe(&sender, false), probe(&receiver, true));
        sim.schedule_app_send(0, vec![7]);
        sim.run_until_complete();

        assert_eq!(receiver.borrow().arrivals, vec![(1, 7)]);
        assert!(receiver.borrow().timer_fired.is_empty());
        assert_eq!(sender.borrow().timer_fired, vec![20]);
    }

    #[test]
    fn channel_never_reorders() {
        let sender = Rc::new(RefCell::new(Observed::default()));
        let receiver = Rc::new(RefCell::new(Observed::default()));
        let config = SimConfig {
            min_latency: 1,
            max_latency: 50,
            seed: 3,
            ..Default::default()
        };
        let mut sim = Simulator::new(config, probe(&sender, false), probe(&receiver, false));
        for i in 0..40u8 {
            sim.schedule_app_send(i as u64, vec![i]);
        }
        sim.run_until_complete();

        let seqs: Vec<u32> = receiver.borrow().arrivals.iter().map(|&(_, s)| s).collect();
        assert_eq!(seqs, (0..40).collect::<Vec<u32>>());
        let times: Vec<u64> = receiver.borrow().arrivals.iter().map(|&(t, _)| t).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn deterministic_faults_fire_once() {
        let sender = Rc::new(RefCell::new(Observed::default()));
        let receiver = Rc::new(RefCell::new(Observed::default()));
        let mut sim = Simulator::new(
            SimConfig::default(),
            probe(&sender, false),
            probe(&receiver, false),
        );
        sim.add_drop_sender_seq_once(1);
        sim.add_corrupt_sender_seq_once(2);
        for (t, seq) in [1u8, 1, 2, 2].into_iter().enumerate() {
            sim.schedule_app_send(t as u64, vec![seq]);
        }
        sim.run_until_complete();

        let report = sim.export_report();
        assert_eq!(report.sender_packet_count, 4);
        assert_eq!(report.channel.lost, 1);
        assert_eq!(report.channel.corrupted, 1);
        let arrivals = &receiver.borrow().arrivals;
        assert_eq!(arrivals.len(), 3);
    }

    #[test]
    fn time_limit_stops_the_run() {
        let sender = Rc::new(RefCell::new(Observed::default()));
        let receiver = Rc::new(RefCell::new(Observed::default()));
        let config = SimConfig {
            max_time: Some(15),
            ..Default::default()
        };
        let mut sim = Simulator::new(config, probe(&sender, false), probe(&receiver, false));
        sim.run_until_complete();

        assert!(sender.borrow().timer_fired.is_empty());
        assert_eq!(sim.remaining_events(), 2);
    }
}
