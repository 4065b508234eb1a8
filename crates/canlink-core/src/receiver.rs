//! Incremental receive state machine
//!
//! Consumes one raw wire byte per call and yields complete [`CanMessage`]s.
//! Owned exclusively by the bridge's receive thread; it never suspends and
//! never shares state.
//!
//! The machine self-synchronizes: any framing fault resets it to `Idle` and
//! the next `FRAME_START` opens a fresh frame, so corruption costs at most
//! the frames it touched. Faults are counted and logged, never surfaced.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FramingError;
use crate::framing::{self, ESCAPE, FRAME_START, ID_LEN};
use crate::message::{CanMessage, MAX_ID, MAX_PAYLOAD_LEN};

/// Smallest valid body length (identifier only, empty payload)
const MIN_BODY_LEN: usize = ID_LEN;

/// Largest valid body length (identifier plus full payload)
const MAX_BODY_LEN: usize = ID_LEN + MAX_PAYLOAD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ReadingLength,
    ReadingPayload,
}

/// Per-bridge receive state machine
#[derive(Debug)]
pub struct Receiver {
    phase: Phase,
    body: Vec<u8>,
    expected: usize,
    escape: bool,
    framing_errors: u64,
}

impl Receiver {
    /// Create a receiver in the `Idle` phase
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            body: Vec::with_capacity(MAX_BODY_LEN),
            expected: 0,
            escape: false,
            framing_errors: 0,
        }
    }

    /// Consume one raw wire byte, yielding a message when a frame completes
    pub fn feed(&mut self, raw: u8) -> Option<CanMessage> {
        // An unescaped FRAME_START is a boundary from any state. The encoder
        // always stuffs literal 0xFF body bytes, so a raw one can only mean a
        // new frame; this is what makes the stream self-synchronizing.
        if raw == FRAME_START {
            if self.escape {
                self.framing_errors += 1;
                tracing::trace!("frame boundary with escape pending, resyncing");
            }
            self.escape = false;
            self.body.clear();
            self.phase = Phase::ReadingLength;
            return None;
        }

        let literal = if self.escape {
            self.escape = false;
            match framing::substitute(raw) {
                Some(byte) => byte,
                None => {
                    self.fault(FramingError::BadEscape(raw));
                    return None;
                }
            }
        } else if raw == ESCAPE {
            self.escape = true;
            return None;
        } else {
            raw
        };

        match self.phase {
            Phase::Idle => None,
            Phase::ReadingLength => {
                let length = literal as usize;
                if !(MIN_BODY_LEN..=MAX_BODY_LEN).contains(&length) {
                    self.fault(FramingError::LengthOutOfRange(literal));
                    return None;
                }
                self.expected = length;
                self.phase = Phase::ReadingPayload;
                None
            }
            Phase::ReadingPayload => {
                self.body.push(literal);
                if self.body.len() < self.expected {
                    return None;
                }

                let id = LittleEndian::read_u32(&self.body[..ID_LEN]);
                if id > MAX_ID {
                    self.fault(FramingError::ReservedIdBits(id));
                    return None;
                }
                let payload = self.body[ID_LEN..].to_vec();
                self.reset();
                CanMessage::new(id, payload).ok()
            }
        }
    }

    /// Number of framing faults recovered from so far
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    fn fault(&mut self, error: FramingError) {
        self.framing_errors += 1;
        tracing::trace!("framing error, resetting receiver: {error}");
        self.reset();
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.body.clear();
        self.expected = 0;
        self.escape = false;
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_all(receiver: &mut Receiver, bytes: &[u8]) -> Vec<CanMessage> {
        bytes.iter().filter_map(|&b| receiver.feed(b)).collect()
    }

    fn frame(id: u32, payload: &[u8]) -> Vec<u8> {
        framing::encode(&CanMessage::new(id, payload.to_vec()).unwrap())
    }

    #[test]
    fn test_decodes_single_frame() {
        let mut receiver = Receiver::new();
        let decoded = feed_all(&mut receiver, &frame(0x0205_5c00, &[1, 2, 3]));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x0205_5c00);
        assert_eq!(decoded[0].payload(), &[1, 2, 3]);
        assert_eq!(receiver.framing_errors(), 0);
    }

    #[test]
    fn test_decodes_back_to_back_frames() {
        let mut receiver = Receiver::new();
        let mut bytes = frame(0x10, &[0xAA]);
        bytes.extend(frame(0x11, &[0xBB, 0xCC]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id(), 0x10);
        assert_eq!(decoded[1].payload(), &[0xBB, 0xCC]);
    }

    #[test]
    fn test_roundtrip_with_markers_everywhere() {
        // Markers at the start, middle, end, adjacent and repeated
        let payloads: &[&[u8]] = &[
            &[FRAME_START],
            &[ESCAPE],
            &[FRAME_START, FRAME_START, FRAME_START],
            &[ESCAPE, ESCAPE, ESCAPE],
            &[FRAME_START, ESCAPE, FRAME_START, ESCAPE],
            &[0x00, FRAME_START, 0x7F, ESCAPE, 0x01],
            &[FRAME_START, ESCAPE, 0xFD, 0xFC, 0x00, 0x01, ESCAPE, FRAME_START],
        ];
        for payload in payloads {
            let mut receiver = Receiver::new();
            let decoded = feed_all(&mut receiver, &frame(MAX_ID, payload));
            assert_eq!(decoded.len(), 1, "payload {payload:02x?}");
            assert_eq!(decoded[0].id(), MAX_ID);
            assert_eq!(decoded[0].payload(), *payload);
            assert_eq!(receiver.framing_errors(), 0);
        }
    }

    #[test]
    fn test_discards_bytes_outside_a_frame() {
        let mut receiver = Receiver::new();
        let mut bytes = vec![0x12, 0x34, 0x56];
        bytes.extend(frame(0x42, &[7]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x42);
    }

    #[test]
    fn test_oversized_length_recovers_on_next_frame() {
        let mut receiver = Receiver::new();
        // Declared body length 13 is beyond the 12-byte maximum
        let mut bytes = vec![FRAME_START, 13, 0x01, 0x02];
        bytes.extend(frame(0x99, &[4, 5]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x99);
        assert_eq!(receiver.framing_errors(), 1);
    }

    #[test]
    fn test_undersized_length_recovers_on_next_frame() {
        let mut receiver = Receiver::new();
        // Bodies shorter than the 4 identifier bytes are invalid
        let mut bytes = vec![FRAME_START, 2, 0xAB, 0xCD];
        bytes.extend(frame(0x7, &[]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x7);
        assert!(decoded[0].payload().is_empty());
    }

    #[test]
    fn test_stray_frame_start_discards_partial_frame() {
        let mut receiver = Receiver::new();
        // A truncated frame claiming 10 body bytes, interrupted by a new frame
        let mut bytes = vec![FRAME_START, 10, 0x01, 0x02, 0x03];
        bytes.extend(frame(0x55, &[0xEE]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x55);
        assert_eq!(decoded[0].payload(), &[0xEE]);
    }

    #[test]
    fn test_bad_substitute_code_resets() {
        let mut receiver = Receiver::new();
        // ESCAPE followed by 0x00 is not a valid substitute
        let mut bytes = vec![FRAME_START, 5, ESCAPE, 0x00];
        bytes.extend(frame(0x1, &[0x2]));
        let decoded = feed_all(&mut receiver, &bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id(), 0x1);
        assert_eq!(receiver.framing_errors(), 1);
    }

    #[test]
    fn test_reserved_id_bits_rejected() {
        let mut receiver = Receiver::new();
        // Hand-built body with the top identifier bits set
        let bytes = vec![FRAME_START, 4, 0x00, 0x00, 0x00, 0xE0];
        // 0xE0 puts the id above 29 bits but none of these are marker bytes
        let decoded = feed_all(&mut receiver, &bytes);
        assert!(decoded.is_empty());
        assert_eq!(receiver.framing_errors(), 1);
    }
}
