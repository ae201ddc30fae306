use serde::{Deserialize, Serialize};

use crate::checksum;

/// Number of payload bytes carried by every segment.
pub const PAYLOAD_SIZE: usize = 20;

/// Wire value of an unused ack field (two's complement of -1).
pub const NOT_IN_USE: u32 = u32::MAX;

pub type Payload = [u8; PAYLOAD_SIZE];

/// A fixed-size application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message(pub Payload);

impl Message {
    /// Zero-pads short input and truncates long input to `PAYLOAD_SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        let len = data.len().min(PAYLOAD_SIZE);
        payload[..len].copy_from_slice(&data[..len]);
        Self(payload)
    }

    /// A message whose every byte is the same letter, `'a' + index mod 26`.
    pub fn filled(index: usize) -> Self {
        Self([b'a' + (index % 26) as u8; PAYLOAD_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Single-field overwrite applied by a lossy channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    PayloadByte { index: usize, value: u8 },
    SeqNum(u32),
    AckNum(u32),
}

/// A protocol data unit. Fields are fixed at construction; the checksum is
/// computed once and carried unchanged across the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    seq_num: u32,
    ack_num: Option<u32>,
    payload: Payload,
    checksum: u32,
}

impl Segment {
    /// Data segment carrying `payload`, with the ack field unused.
    pub fn data(seq_num: u32, payload: Payload) -> Self {
        Self::new(seq_num, None, payload)
    }

    /// Pure acknowledgment for `ack_num` with a zeroed payload.
    pub fn ack(ack_num: u32) -> Self {
        Self::new(0, Some(ack_num), [0u8; PAYLOAD_SIZE])
    }

    fn new(seq_num: u32, ack_num: Option<u32>, payload: Payload) -> Self {
        let checksum =
            checksum::compute_checksum(seq_num, ack_num.unwrap_or(NOT_IN_USE), &payload);
        Self {
            seq_num,
            ack_num,
            payload,
            checksum,
        }
    }

    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    pub fn ack_num(&self) -> Option<u32> {
        self.ack_num
    }

    /// The ack field as it appears on the wire.
    pub fn ack_field(&self) -> u32 {
        self.ack_num.unwrap_or(NOT_IN_USE)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn is_ack(&self) -> bool {
        self.ack_num.is_some()
    }

    pub fn is_corrupted(&self) -> bool {
        checksum::is_corrupted(self)
    }

    /// Copy of this segment with one field overwritten and the original
    /// checksum kept.
    pub fn corrupted(mut self, corruption: Corruption) -> Self {
        match corruption {
            Corruption::PayloadByte { index, value } => {
                self.payload[index % PAYLOAD_SIZE] = value;
            }
            Corruption::SeqNum(seq) => self.seq_num = seq,
            Corruption::AckNum(ack) => self.ack_num = Some(ack),
        }
        self
    }
}
