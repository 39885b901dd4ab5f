//! Monotonic, time-ordered message ID generation.
//!
//! An id is the 64-bit unix-millisecond timestamp followed by a 32-bit
//! per-process sequence number, both encoded most-significant-digit
//! first in the RFC 4648 base32 alphabet without padding. The fixed
//! width makes lexicographic order equal generation order.

use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Digits needed for a u64 (ceil(64 / 5)).
const TIME_DIGITS: usize = 13;
/// Digits needed for a u32 (ceil(32 / 5)).
const SEQ_DIGITS: usize = 7;

/// Generates node-unique, time-sortable message ids.
///
/// If the clock reads the same or an earlier millisecond than the last
/// call, the sequence increments instead, so ids stay strictly
/// increasing even across clock adjustments.
#[derive(Debug)]
pub struct MessageIdGenerator {
    last_millis: u64,
    sequence: u32,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self {
            last_millis: 0,
            sequence: 0,
        }
    }

    /// Next id for the current wall-clock time.
    pub fn next_id(&mut self) -> String {
        self.next_id_at(epoch_millis())
    }

    fn next_id_at(&mut self, now_millis: u64) -> String {
        if now_millis > self.last_millis {
            self.last_millis = now_millis;
            self.sequence = 0;
        } else {
            self.sequence = self.sequence.wrapping_add(1);
        }

        let mut id = String::with_capacity(TIME_DIGITS + SEQ_DIGITS);
        encode_fixed(self.last_millis, TIME_DIGITS, &mut id);
        encode_fixed(self.sequence as u64, SEQ_DIGITS, &mut id);
        id
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `value` as exactly `digits` base32 characters, most
/// significant digit first.
fn encode_fixed(value: u64, digits: usize, out: &mut String) {
    for i in (0..digits).rev() {
        let index = ((value >> (i * 5)) & 0x1f) as usize;
        out.push(ALPHABET[index] as char);
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
