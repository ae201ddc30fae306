//! Selective-Repeat send side.
//!
//! [`SrSender`] keeps up to `window` segments in flight. Every segment is
//! acknowledged individually; `base` only slides through a contiguous run of
//! acknowledged slots. A single timer covers all outstanding segments and on
//! expiry every unacknowledged segment in the window is resent.
//!
//! ```text
//!   base           next_seq_num
//!    │                  │
//! ───┼──────────────────┼───────────────┼──▶ seq space (mod N)
//!    │ <── in flight ──>│ <── usable ──>│
//!    └─────────── window ───────────────┘
//! ```

use sr_lab_abstract::{
    ConfigError, Message, ProtocolConfig, Segment, SequenceSpace, SystemContext,
    TransportProtocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    NotSent,
    SentUnacked,
    Acked,
}

#[derive(Debug, Clone)]
struct SendSlot {
    status: SlotStatus,
    segment: Option<Segment>,
}

impl SendSlot {
    const EMPTY: Self = Self {
        status: SlotStatus::NotSent,
        segment: None,
    };
}

/// Result of handing a message to [`SrSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted with this sequence number.
    Sent(u32),
    /// No room in the window; the message was dropped.
    WindowFull,
}

/// Result of processing an acknowledgment segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// In-window ack; `slid` is how far `base` advanced.
    Accepted { slid: u32 },
    /// Checksum mismatch.
    Corrupted,
    /// Outside the window or for a slot that was never sent.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Application messages dropped because the window was full.
    pub window_full: u64,
    /// First transmissions of data segments.
    pub segments_sent: u64,
    pub retransmissions: u64,
    /// Acks that passed the integrity check.
    pub acks_received: u64,
    /// Acks that newly acknowledged a slot.
    pub acks_new: u64,
    pub acks_corrupted: u64,
    pub acks_ignored: u64,
}

pub struct SrSender {
    space: SequenceSpace,
    timeout: u64,
    base: u32,
    next_seq_num: u32,
    slots: Vec<SendSlot>,
    timer_running: bool,
    stats: SenderStats,
}

impl SrSender {
    pub fn new(config: &ProtocolConfig) -> Result<Self, ConfigError> {
        let space = config.sequence_space()?;
        Ok(Self {
            space,
            timeout: config.timeout,
            base: 0,
            next_seq_num: 0,
            slots: vec![SendSlot::EMPTY; space.modulus() as usize],
            timer_running: false,
            stats: SenderStats::default(),
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq_num(&self) -> u32 {
        self.next_seq_num
    }

    /// Segments sent but not yet slid past, `(next_seq_num - base) mod N`.
    pub fn in_flight(&self) -> u32 {
        self.space.offset(self.base, self.next_seq_num)
    }

    pub fn status(&self, seq: u32) -> Option<SlotStatus> {
        self.slots.get(seq as usize).map(|slot| slot.status)
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    pub fn space(&self) -> SequenceSpace {
        self.space
    }

    /// Transmit `message` if the window has room, otherwise drop it.
    pub fn send(&mut self, ctx: &mut dyn SystemContext, message: &Message) -> SendOutcome {
        if self.in_flight() >= self.space.window() {
            self.stats.window_full += 1;
            ctx.log("SR send: window full, message dropped");
            ctx.record_metric("window_full", self.stats.window_full as f64);
            return SendOutcome::WindowFull;
        }

        let seq = self.next_seq_num;
        let segment = Segment::data(seq, message.0);
        let window_was_empty = self.base == self.next_seq_num;

        self.slots[seq as usize] = SendSlot {
            status: SlotStatus::SentUnacked,
            segment: Some(segment.clone()),
        };
        ctx.log(&format!("SR send: sent packet {seq}"));
        ctx.transmit(segment);
        self.stats.segments_sent += 1;

        if window_was_empty {
            self.start_timer(ctx);
        }
        self.next_seq_num = self.space.next(seq);
        ctx.record_metric("in_flight", self.in_flight() as f64);
        SendOutcome::Sent(seq)
    }

    /// Process an acknowledgment arriving from the channel.
    pub fn on_ack(&mut self, ctx: &mut dyn SystemContext, segment: &Segment) -> AckOutcome {
        if segment.is_corrupted() {
            self.stats.acks_corrupted += 1;
            ctx.log("SR ack: corrupted ACK received, ignored");
            return AckOutcome::Corrupted;
        }
        let Some(ack) = segment.ack_num() else {
            self.stats.acks_ignored += 1;
            ctx.log("SR ack: segment carries no ack number, ignored");
            return AckOutcome::Ignored;
        };
        self.stats.acks_received += 1;

        if ack >= self.space.modulus() || !self.space.contains(self.base, ack) {
            self.stats.acks_ignored += 1;
            ctx.log(&format!("SR ack: ACK {ack} is outside window, ignored"));
            return AckOutcome::Ignored;
        }

        let slot = &mut self.slots[ack as usize];
        match slot.status {
            SlotStatus::NotSent => {
                self.stats.acks_ignored += 1;
                ctx.log(&format!("SR ack: ACK {ack} names an unsent slot, ignored"));
                return AckOutcome::Ignored;
            }
            SlotStatus::SentUnacked => {
                slot.status = SlotStatus::Acked;
                self.stats.acks_new += 1;
                ctx.log(&format!("SR ack: ACK {ack} marked as ACKED"));
            }
            SlotStatus::Acked => {
                ctx.log(&format!("SR ack: duplicate ACK {ack}"));
            }
        }

        let slid = self.slide();
        if slid > 0 {
            ctx.log(&format!("SR ack: window slid by {slid}, base now {}", self.base));
        }
        if !self.has_unacked() {
            self.stop_timer(ctx);
        }
        ctx.record_metric("in_flight", self.in_flight() as f64);
        AckOutcome::Accepted { slid }
    }

    /// Resend every unacknowledged segment in the window and restart the timer.
    pub fn on_timeout(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log("SR timeout: resending unACKed packets");
        for seq in self.space.iter_window(self.base) {
            let slot = &self.slots[seq as usize];
            if slot.status != SlotStatus::SentUnacked {
                continue;
            }
            if let Some(segment) = &slot.segment {
                ctx.transmit(segment.clone());
                self.stats.retransmissions += 1;
                ctx.log(&format!("SR timeout: resent packet {seq}"));
            }
        }
        ctx.record_metric("retransmissions", self.stats.retransmissions as f64);
        self.start_timer(ctx);
    }

    /// Advance `base` through the contiguous run of acked slots.
    fn slide(&mut self) -> u32 {
        let mut slid = 0;
        while self.slots[self.base as usize].status == SlotStatus::Acked {
            self.slots[self.base as usize] = SendSlot::EMPTY;
            self.base = self.space.next(self.base);
            slid += 1;
        }
        slid
    }

    fn has_unacked(&self) -> bool {
        self.space
            .iter_window(self.base)
            .any(|seq| self.slots[seq as usize].status == SlotStatus::SentUnacked)
    }

    fn start_timer(&mut self, ctx: &mut dyn SystemContext) {
        ctx.start_timer(self.timeout);
        self.timer_running = true;
    }

    fn stop_timer(&mut self, ctx: &mut dyn SystemContext) {
        if self.timer_running {
            ctx.stop_timer();
            self.timer_running = false;
        }
    }
}

impl TransportProtocol for SrSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "SR sender ready (window {}, seq space {})",
            self.space.window(),
            self.space.modulus()
        ));
    }

    fn on_segment(&mut self, ctx: &mut dyn SystemContext, segment: Segment) {
        self.on_ack(ctx, &segment);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext) {
        self.on_timeout(ctx);
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.send(ctx, &Message::from_bytes(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingContext, TimerOp};

    fn sender() -> SrSender {
        SrSender::new(&ProtocolConfig::default()).unwrap()
    }

    fn msg(i: usize) -> Message {
        Message::filled(i)
    }

    fn assert_window_invariant(sender: &SrSender) {
        assert!(
            sender.in_flight() <= sender.space().window(),
            "base={} next={}",
            sender.base(),
            sender.next_seq_num()
        );
    }

    #[test]
    fn rejects_ambiguous_config() {
        let config = ProtocolConfig {
            window_size: 6,
            seq_space: 12,
            ..Default::default()
        };
        assert!(SrSender::new(&config).is_err());
    }

    #[test]
    fn full_window_without_loss() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();

        for i in 0..6 {
            assert_eq!(sender.send(&mut ctx, &msg(i)), SendOutcome::Sent(i as u32));
            assert_window_invariant(&sender);
        }
        assert_eq!(ctx.transmitted_seqs(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(ctx.timer_ops, vec![TimerOp::Start(16)]);
        assert!(sender.timer_running());

        for ack in 0..6 {
            let outcome = sender.on_ack(&mut ctx, &Segment::ack(ack));
            assert_eq!(outcome, AckOutcome::Accepted { slid: 1 });
            assert_window_invariant(&sender);
        }
        assert_eq!(sender.base(), 6);
        assert_eq!(sender.in_flight(), 0);
        assert!(!sender.timer_running());
        assert_eq!(ctx.timer_ops, vec![TimerOp::Start(16), TimerOp::Stop]);
        assert_eq!(sender.stats().acks_new, 6);
    }

    #[test]
    fn seventh_send_is_rejected_while_window_full() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..6 {
            sender.send(&mut ctx, &msg(i));
        }
        ctx.clear();

        assert_eq!(sender.send(&mut ctx, &msg(6)), SendOutcome::WindowFull);
        assert_eq!(sender.stats().window_full, 1);
        assert!(ctx.transmitted.is_empty());
        assert!(ctx.timer_ops.is_empty());
        assert_eq!(sender.base(), 0);
        assert_eq!(sender.next_seq_num(), 6);
    }

    #[test]
    fn out_of_order_ack_waits_for_the_gap() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..5 {
            sender.send(&mut ctx, &msg(i));
        }

        assert_eq!(
            sender.on_ack(&mut ctx, &Segment::ack(3)),
            AckOutcome::Accepted { slid: 0 }
        );
        assert_eq!(sender.status(3), Some(SlotStatus::Acked));
        assert_eq!(sender.base(), 0);

        for ack in [2, 1] {
            assert_eq!(
                sender.on_ack(&mut ctx, &Segment::ack(ack)),
                AckOutcome::Accepted { slid: 0 }
            );
        }
        assert_eq!(sender.base(), 0);

        assert_eq!(
            sender.on_ack(&mut ctx, &Segment::ack(0)),
            AckOutcome::Accepted { slid: 4 }
        );
        assert_eq!(sender.base(), 4);
        assert_eq!(sender.status(3), Some(SlotStatus::NotSent));
        // segment 4 is still outstanding
        assert!(sender.timer_running());
    }

    #[test]
    fn timeout_resends_only_unacked_segments() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..3 {
            sender.send(&mut ctx, &msg(i));
        }
        sender.on_ack(&mut ctx, &Segment::ack(0));
        ctx.clear();

        sender.on_timeout(&mut ctx);
        assert_eq!(ctx.transmitted_seqs(), vec![1, 2]);
        assert_eq!(ctx.timer_ops, vec![TimerOp::Start(16)]);
        assert_eq!(sender.stats().retransmissions, 2);
        assert_eq!(sender.status(1), Some(SlotStatus::SentUnacked));
        assert_eq!(sender.status(2), Some(SlotStatus::SentUnacked));
    }

    #[test]
    fn timeout_skips_selectively_acked_segments() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..4 {
            sender.send(&mut ctx, &msg(i));
        }
        sender.on_ack(&mut ctx, &Segment::ack(2));
        ctx.clear();

        sender.on_timeout(&mut ctx);
        assert_eq!(ctx.transmitted_seqs(), vec![0, 1, 3]);
    }

    #[test]
    fn retransmitted_segment_matches_original() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        sender.send(&mut ctx, &Message::from_bytes(b"payload"));
        let original = ctx.transmitted[0].clone();
        ctx.clear();

        sender.on_timeout(&mut ctx);
        assert_eq!(ctx.transmitted, vec![original]);
    }

    #[test]
    fn corrupted_ack_changes_nothing() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        sender.send(&mut ctx, &msg(0));
        ctx.clear();

        let bad = Segment::ack(0).corrupted(sr_lab_abstract::Corruption::AckNum(1));
        assert_eq!(sender.on_ack(&mut ctx, &bad), AckOutcome::Corrupted);
        assert_eq!(sender.status(0), Some(SlotStatus::SentUnacked));
        assert_eq!(sender.base(), 0);
        assert!(sender.timer_running());
        assert!(ctx.timer_ops.is_empty());
        assert_eq!(sender.stats().acks_corrupted, 1);
    }

    #[test]
    fn duplicate_ack_is_idempotent() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..3 {
            sender.send(&mut ctx, &msg(i));
        }
        sender.on_ack(&mut ctx, &Segment::ack(1));
        ctx.clear();

        assert_eq!(
            sender.on_ack(&mut ctx, &Segment::ack(1)),
            AckOutcome::Accepted { slid: 0 }
        );
        assert_eq!(sender.status(1), Some(SlotStatus::Acked));
        assert_eq!(sender.base(), 0);
        assert!(ctx.transmitted.is_empty());
        assert!(ctx.timer_ops.is_empty());
        assert_eq!(sender.stats().acks_new, 1);
    }

    #[test]
    fn stale_and_unsent_acks_are_ignored() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        for i in 0..2 {
            sender.send(&mut ctx, &msg(i));
        }
        sender.on_ack(&mut ctx, &Segment::ack(0));

        // behind base
        assert_eq!(sender.on_ack(&mut ctx, &Segment::ack(0)), AckOutcome::Ignored);
        // in window but never sent
        assert_eq!(sender.on_ack(&mut ctx, &Segment::ack(4)), AckOutcome::Ignored);
        // beyond window
        assert_eq!(sender.on_ack(&mut ctx, &Segment::ack(30)), AckOutcome::Ignored);
        // outside the sequence space entirely
        assert_eq!(sender.on_ack(&mut ctx, &Segment::ack(65)), AckOutcome::Ignored);

        assert_eq!(sender.base(), 1);
        assert_eq!(sender.next_seq_num(), 2);
        assert_eq!(sender.status(4), Some(SlotStatus::NotSent));
        assert_eq!(sender.stats().acks_ignored, 4);
        assert_window_invariant(&sender);
    }

    #[test]
    fn data_segment_on_ack_path_is_ignored() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        sender.send(&mut ctx, &msg(0));

        let data = Segment::data(0, msg(0).0);
        assert_eq!(sender.on_ack(&mut ctx, &data), AckOutcome::Ignored);
        assert_eq!(sender.status(0), Some(SlotStatus::SentUnacked));
    }

    #[test]
    fn window_slides_across_wraparound() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();

        // walk base up to 60
        for i in 0..60 {
            sender.send(&mut ctx, &msg(i));
            sender.on_ack(&mut ctx, &Segment::ack(i as u32));
        }
        assert_eq!(sender.base(), 60);
        ctx.clear();

        for i in 0..6 {
            sender.send(&mut ctx, &msg(i));
            assert_window_invariant(&sender);
        }
        assert_eq!(ctx.transmitted_seqs(), vec![60, 61, 62, 63, 0, 1]);
        assert_eq!(sender.next_seq_num(), 2);
        assert_eq!(sender.send(&mut ctx, &msg(6)), SendOutcome::WindowFull);

        // acks past the wrap come first
        for ack in [0, 1] {
            assert_eq!(
                sender.on_ack(&mut ctx, &Segment::ack(ack)),
                AckOutcome::Accepted { slid: 0 }
            );
        }
        assert_eq!(sender.base(), 60);

        for ack in 60..63 {
            sender.on_ack(&mut ctx, &Segment::ack(ack));
        }
        assert_eq!(sender.base(), 63);
        assert_eq!(
            sender.on_ack(&mut ctx, &Segment::ack(63)),
            AckOutcome::Accepted { slid: 3 }
        );
        assert_eq!(sender.base(), 2);
        assert_eq!(sender.in_flight(), 0);
        assert!(!sender.timer_running());
        assert_window_invariant(&sender);
    }

    #[test]
    fn timer_restarts_when_window_refills() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        sender.send(&mut ctx, &msg(0));
        sender.on_ack(&mut ctx, &Segment::ack(0));
        sender.send(&mut ctx, &msg(1));
        sender.send(&mut ctx, &msg(2));
        assert_eq!(
            ctx.timer_ops,
            vec![TimerOp::Start(16), TimerOp::Stop, TimerOp::Start(16)]
        );
    }

    #[test]
    fn app_data_is_padded_into_a_message() {
        let mut ctx = RecordingContext::default();
        let mut sender = sender();
        sender.on_app_data(&mut ctx, b"hi");
        assert_eq!(ctx.transmitted.len(), 1);
        assert_eq!(ctx.transmitted[0].payload(), &Message::from_bytes(b"hi").0);
    }
}
