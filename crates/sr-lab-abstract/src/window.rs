//! Modular sequence-number arithmetic shared by sender and receiver.
//!
//! ```text
//!        base                base + window
//!  ───────┼───────────────────────┼──────────────▶ (mod N)
//!  behind │ <───── in window ───> │ ahead
//! ```
//!
//! With `N >= 2 * window + 1` a number can never be both "behind" one
//! endpoint's window and "in" the other's, which is what lets both sides
//! classify wrapped numbers without ambiguity.

use serde::Serialize;

use crate::config::ConfigError;

/// Half-space membership test: is `candidate` in `[base, base + window)`
/// on a ring of `modulus` numbers?
pub fn in_window(candidate: u32, base: u32, window: u32, modulus: u32) -> bool {
    distance(base, candidate, modulus) < window
}

/// Forward distance from `from` to `to` on a ring of `modulus` numbers.
fn distance(from: u32, to: u32, modulus: u32) -> u32 {
    let (from, to) = (from % modulus, to % modulus);
    if to >= from {
        to - from
    } else {
        modulus - from + to
    }
}

/// A validated window/sequence-space pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceSpace {
    window: u32,
    modulus: u32,
}

impl SequenceSpace {
    pub fn new(window: u32, modulus: u32) -> Result<Self, ConfigError> {
        if window == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        let required = window
            .checked_mul(2)
            .and_then(|w| w.checked_add(1))
            .ok_or(ConfigError::WindowTooLarge { window })?;
        if modulus < required {
            return Err(ConfigError::SequenceSpaceTooSmall {
                window,
                seq_space: modulus,
                required,
            });
        }
        Ok(Self { window, modulus })
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    pub fn contains(&self, base: u32, candidate: u32) -> bool {
        in_window(candidate, base, self.window, self.modulus)
    }

    /// `(to - from) mod N`.
    pub fn offset(&self, from: u32, to: u32) -> u32 {
        distance(from, to, self.modulus)
    }

    pub fn next(&self, seq: u32) -> u32 {
        (seq % self.modulus + 1) % self.modulus
    }

    pub fn add(&self, seq: u32, n: u32) -> u32 {
        ((seq % self.modulus) as u64 + n as u64).rem_euclid(self.modulus as u64) as u32
    }

    /// Sequence numbers of the window starting at `base`, oldest first.
    pub fn iter_window(self, base: u32) -> impl Iterator<Item = u32> {
        (0..self.window).map(move |i| self.add(base, i))
    }
}
