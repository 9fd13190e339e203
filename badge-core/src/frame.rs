//! Per-link framing: turn a raw byte stream into discrete typed messages
//! and back. Framing errors resynchronize on the magic bytes instead of
//! failing the link.

use crate::message::{pack_header, unpack_header, Payload, WireError, MAGIC_1, MAGIC_2, MAX_PAYLOAD};

/// Largest encoded frame: two magic bytes, header, full payload.
pub const MAX_FRAME: usize = MAX_PAYLOAD + 3;

/// A complete deframed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub wire_type: u8,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Magic1,
    Magic2,
    Header,
    Payload,
}

/// Byte-assembly state machine for one link. Fed one byte at a time;
/// a message may span arbitrarily many ticks.
#[derive(Debug)]
pub struct Deframer {
    state: ReceiveState,
    wire_type: u8,
    remaining: u8,
    payload: Payload,
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            state: ReceiveState::Magic1,
            wire_type: 0,
            remaining: 0,
            payload: Payload::empty(),
        }
    }

    /// Drop any partially assembled message and resynchronize.
    pub fn reset(&mut self) {
        self.state = ReceiveState::Magic1;
        self.remaining = 0;
        self.payload = Payload::empty();
    }

    /// Feed one received byte; returns a frame once one completes.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ReceiveState::Magic1 => {
                if byte == MAGIC_1 {
                    self.state = ReceiveState::Magic2;
                }
            }
            ReceiveState::Magic2 => match byte {
                MAGIC_2 => self.state = ReceiveState::Header,
                // A repeated first magic byte may be the start of the
                // real frame; keep waiting for the second one.
                MAGIC_1 => {}
                _ => self.state = ReceiveState::Magic1,
            },
            ReceiveState::Header => {
                let (wire_type, len) = unpack_header(byte);
                self.wire_type = wire_type;
                self.payload = Payload::empty();
                if len == 0 {
                    self.state = ReceiveState::Magic1;
                    return Some(Frame {
                        wire_type,
                        payload: self.payload,
                    });
                }
                self.remaining = len;
                self.state = ReceiveState::Payload;
            }
            ReceiveState::Payload => {
                self.payload.push(byte);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = ReceiveState::Magic1;
                    return Some(Frame {
                        wire_type: self.wire_type,
                        payload: self.payload,
                    });
                }
            }
        }
        None
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one message into a frame buffer. Always emits
/// magic-magic-header-payload, never a partial frame.
pub fn encode(wire_type: u8, payload: &[u8]) -> Result<([u8; MAX_FRAME], usize), WireError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge);
    }
    let mut buf = [0u8; MAX_FRAME];
    buf[0] = MAGIC_1;
    buf[1] = MAGIC_2;
    buf[2] = pack_header(wire_type, payload.len() as u8);
    buf[3..3 + payload.len()].copy_from_slice(payload);
    Ok((buf, 3 + payload.len()))
}
