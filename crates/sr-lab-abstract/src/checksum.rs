//! Additive integrity check shared by both endpoints.

use crate::segment::Segment;

/// Sum of the sequence number, the ack field and every payload byte.
///
/// Arithmetic wraps, so overwriting any single field with a different value
/// always changes the result.
pub fn compute_checksum(seq_num: u32, ack_field: u32, payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(seq_num.wrapping_add(ack_field), |sum, &byte| {
            sum.wrapping_add(byte as u32)
        })
}

pub fn is_corrupted(segment: &Segment) -> bool {
    compute_checksum(segment.seq_num(), segment.ack_field(), segment.payload())
        != segment.checksum()
}
