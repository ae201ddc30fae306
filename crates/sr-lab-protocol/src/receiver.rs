//! Selective-Repeat receive side.
//!
//! Every intact segment inside `[base, base + window)` is buffered and
//! acknowledged on its own; the contiguous run starting at `base` is handed to
//! the application as soon as it is complete. Anything else is dropped without
//! an acknowledgment, so the sender's timer is the only recovery path for it.

use sr_lab_abstract::{
    ConfigError, Payload, ProtocolConfig, Segment, SequenceSpace, SystemContext,
    TransportProtocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Newly buffered; `delivered` messages went up to the application.
    Buffered { delivered: u32 },
    /// Already buffered; re-acknowledged only.
    Duplicate,
    Corrupted,
    OutOfWindow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Segments that passed the integrity check.
    pub segments_received: u64,
    pub corrupted: u64,
    pub out_of_window: u64,
    pub duplicates: u64,
    pub delivered: u64,
    pub acks_sent: u64,
}

pub struct SrReceiver {
    space: SequenceSpace,
    base: u32,
    buffer: Vec<Option<Payload>>,
    stats: ReceiverStats,
}

impl SrReceiver {
    pub fn new(config: &ProtocolConfig) -> Result<Self, ConfigError> {
        let space = config.sequence_space()?;
        Ok(Self {
            space,
            base: 0,
            buffer: vec![None; space.modulus() as usize],
            stats: ReceiverStats::default(),
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn is_buffered(&self, seq: u32) -> bool {
        self.buffer
            .get(seq as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn on_segment(&mut self, ctx: &mut dyn SystemContext, segment: &Segment) -> ReceiveOutcome {
        if segment.is_corrupted() {
            self.stats.corrupted += 1;
            ctx.log(&format!(
                "SR receive: packet {} corrupted, ignored",
                segment.seq_num()
            ));
            return ReceiveOutcome::Corrupted;
        }
        self.stats.segments_received += 1;

        let seq = segment.seq_num();
        if seq >= self.space.modulus() || !self.space.contains(self.base, seq) {
            self.stats.out_of_window += 1;
            ctx.log(&format!(
                "SR receive: packet {seq} outside receive window, ignored"
            ));
            return ReceiveOutcome::OutOfWindow;
        }

        let slot = &mut self.buffer[seq as usize];
        let duplicate = slot.is_some();
        if duplicate {
            self.stats.duplicates += 1;
            ctx.log(&format!("SR receive: duplicate packet {seq}, already cached"));
        } else {
            *slot = Some(*segment.payload());
            ctx.log(&format!("SR receive: cached packet {seq}"));
        }

        ctx.transmit(Segment::ack(seq));
        self.stats.acks_sent += 1;
        ctx.log(&format!("SR receive: sent ACK {seq}"));

        let delivered = self.deliver_in_order(ctx);
        if duplicate {
            ReceiveOutcome::Duplicate
        } else {
            ReceiveOutcome::Buffered { delivered }
        }
    }

    /// Deliver the buffered run starting at `base`, stopping at the first gap.
    fn deliver_in_order(&mut self, ctx: &mut dyn SystemContext) -> u32 {
        let mut delivered = 0;
        while let Some(payload) = self.buffer[self.base as usize].take() {
            ctx.log(&format!("SR receive: delivering packet {}", self.base));
            ctx.deliver_data(&payload);
            self.base = self.space.next(self.base);
            delivered += 1;
        }
        if delivered > 0 {
            self.stats.delivered += delivered as u64;
            ctx.record_metric("delivered", self.stats.delivered as f64);
        }
        delivered
    }
}

impl TransportProtocol for SrReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "SR receiver ready (window {}, seq space {})",
            self.space.window(),
            self.space.modulus()
        ));
    }

    fn on_segment(&mut self, ctx: &mut dyn SystemContext, segment: Segment) {
        SrReceiver::on_segment(self, ctx, &segment);
    }

    // The receiver never starts a timer.
    fn on_timer(&mut self, _ctx: &mut dyn SystemContext) {}

    // Data flows one way only.
    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}
