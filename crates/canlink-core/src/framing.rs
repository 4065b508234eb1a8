//! Serial frame codec
//!
//! Wire format: `FRAME_START`, then the escaped frame body, where
//! body = `[length:1][id:4, little-endian, 29 significant bits][payload:0..8]`.
//!
//! Byte-stuffing keeps `FRAME_START` unambiguous on the wire: any body byte
//! equal to `FRAME_START` or `ESCAPE` is emitted as `ESCAPE` followed by a
//! fixed substitute code. Decoding is the exact inverse and is driven one
//! byte at a time inside [`crate::receiver::Receiver`], so an unescaped
//! `FRAME_START` is always a frame boundary, never payload content.

use byteorder::{ByteOrder, LittleEndian};

use crate::message::CanMessage;

/// Frame boundary marker (never appears unescaped inside a body)
pub const FRAME_START: u8 = 0xFF;

/// Escape marker introducing a substitute code
pub const ESCAPE: u8 = 0xFE;

/// Substitute code for a literal `FRAME_START` byte (after `ESCAPE`)
pub const FRAME_START_SUBST: u8 = 0xFE;

/// Substitute code for a literal `ESCAPE` byte (after `ESCAPE`)
pub const ESCAPE_SUBST: u8 = 0xFD;

/// Number of identifier bytes at the start of every frame body
pub const ID_LEN: usize = 4;

/// Encode a message into a complete wire frame
pub fn encode(message: &CanMessage) -> Vec<u8> {
    let payload = message.payload();

    let mut body = Vec::with_capacity(1 + ID_LEN + payload.len());
    body.push((ID_LEN + payload.len()) as u8);
    let mut id_bytes = [0u8; ID_LEN];
    LittleEndian::write_u32(&mut id_bytes, message.id());
    body.extend_from_slice(&id_bytes);
    body.extend_from_slice(payload);

    // Worst case every body byte needs stuffing
    let mut frame = Vec::with_capacity(1 + body.len() * 2);
    frame.push(FRAME_START);
    for &byte in &body {
        match byte {
            FRAME_START => {
                frame.push(ESCAPE);
                frame.push(FRAME_START_SUBST);
            }
            ESCAPE => {
                frame.push(ESCAPE);
                frame.push(ESCAPE_SUBST);
            }
            _ => frame.push(byte),
        }
    }
    frame
}

/// Map a substitute code (the byte following `ESCAPE`) back to its literal
pub fn substitute(code: u8) -> Option<u8> {
    match code {
        FRAME_START_SUBST => Some(FRAME_START),
        ESCAPE_SUBST => Some(ESCAPE),
        _ => None,
    }
}
