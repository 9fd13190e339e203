//! Wire contract shared by directly-wired neighbors: magic bytes, 3-bit
//! type tags, header packing and the discovery payload codecs.
//!
//! Frame layout: `[0xA5][0xC3][header][payload...]` where the header packs
//! the message type into its top 3 bits and the payload length into its
//! low 5 bits.

use rand::RngCore;

/// First synchronization byte.
pub const MAGIC_1: u8 = 0xA5;
/// Second synchronization byte.
pub const MAGIC_2: u8 = 0xC3;

/// Largest payload a frame can carry (5-bit length field).
pub const MAX_PAYLOAD: usize = 31;
/// Largest chain the 5-bit identifier space supports.
pub const MAX_PEERS: u8 = 31;

/// Discovery announce, swept left to right.
pub const TYPE_ANNOUNCE: u8 = 0;
/// Discovery completion, swept right to left with the final count.
pub const TYPE_ANNOUNCE_REPLY: u8 = 1;
/// Keepalive exchanged between neighbors while RUNNING.
pub const TYPE_MONITOR: u8 = 2;
/// Chain-wide rediscovery request; forwarded before being acted on.
pub const TYPE_RESET: u8 = 3;
/// First application tag. Tags 4..=7 are delivered to the application.
pub const TYPE_APP_BASE: u8 = 4;
/// Identity-exchange application message; payload is a badge UID.
pub const TYPE_ID_EXCHANGE: u8 = 4;

/// Pack a message type and payload length into the header byte.
pub fn pack_header(wire_type: u8, len: u8) -> u8 {
    ((wire_type & 0x07) << 5) | (len & 0x1f)
}

/// Split a header byte into (type, payload length).
pub fn unpack_header(header: u8) -> (u8, u8) {
    (header >> 5, header & 0x1f)
}

/// Whether a tag belongs to the application, as opposed to the wire
/// protocol itself. Only application tags are ever surfaced to the
/// message-received notifier.
pub fn is_application(wire_type: u8) -> bool {
    wire_type >= TYPE_APP_BASE
}

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload exceeds {MAX_PAYLOAD} bytes")]
    PayloadTooLarge,
    #[error("announce payload malformed")]
    MalformedAnnounce,
    #[error("badge uid payload malformed")]
    MalformedUid,
}

/// Fixed-capacity message payload. The in-memory representation is a
/// plain array; nothing here allocates.
#[derive(Debug, Clone, Copy)]
pub struct Payload {
    bytes: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Payload {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MAX_PAYLOAD],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, WireError> {
        if data.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge);
        }
        let mut p = Self::empty();
        p.bytes[..data.len()].copy_from_slice(data);
        p.len = data.len() as u8;
        Ok(p)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one byte. The deframer bounds the count by the 5-bit
    /// length field, so this cannot overflow in practice.
    pub(crate) fn push(&mut self, byte: u8) {
        debug_assert!((self.len as usize) < MAX_PAYLOAD);
        if (self.len as usize) < MAX_PAYLOAD {
            self.bytes[self.len as usize] = byte;
            self.len += 1;
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}
impl Eq for Payload {}

/// Discovery announce: tells the receiver which sequential identity to
/// adopt, and how many peers the wave front has visited so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announce {
    pub next_peer_id: u8,
    pub peer_count: u8,
}

impl Announce {
    pub fn encode(&self) -> Payload {
        let mut p = Payload::empty();
        p.push(self.next_peer_id);
        p.push(self.peer_count);
        p
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() != 2 {
            return Err(WireError::MalformedAnnounce);
        }
        Ok(Self {
            next_peer_id: data[0],
            peer_count: data[1],
        })
    }
}

/// Discovery completion: the final peer count, adopted by every node the
/// reply passes on its way back to the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceReply {
    pub peer_count: u8,
}

impl AnnounceReply {
    pub fn encode(&self) -> Payload {
        let mut p = Payload::empty();
        p.push(self.peer_count);
        p
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() != 1 {
            return Err(WireError::MalformedAnnounce);
        }
        Ok(Self {
            peer_count: data[0],
        })
    }
}

/// Stable per-badge identity exchanged during pairing. Unlike the 5-bit
/// peer id, a UID survives topology changes and identifies the badge
/// itself, not its position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeUid([u8; 4]);

impl BadgeUid {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, WireError> {
        let bytes: [u8; 4] = data.try_into().map_err(|_| WireError::MalformedUid)?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_all_types_and_lengths() {
        for t in 0..8u8 {
            for len in 0..=MAX_PAYLOAD as u8 {
                let (t2, len2) = unpack_header(pack_header(t, len));
                assert_eq!((t, len), (t2, len2));
            }
        }
    }

    #[test]
    fn application_tags() {
        assert!(!is_application(TYPE_ANNOUNCE));
        assert!(!is_application(TYPE_RESET));
        assert!(is_application(TYPE_ID_EXCHANGE));
        assert!(is_application(7));
    }

    #[test]
    fn payload_capacity_enforced() {
        assert!(Payload::from_slice(&[0u8; MAX_PAYLOAD]).is_ok());
        assert_eq!(
            Payload::from_slice(&[0u8; MAX_PAYLOAD + 1]),
            Err(WireError::PayloadTooLarge)
        );
    }

    #[test]
    fn announce_roundtrip() {
        let a = Announce {
            next_peer_id: 5,
            peer_count: 5,
        };
        let decoded = Announce::decode(a.encode().as_slice()).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn announce_rejects_wrong_size() {
        assert_eq!(Announce::decode(&[1]), Err(WireError::MalformedAnnounce));
        assert_eq!(
            AnnounceReply::decode(&[1, 2]),
            Err(WireError::MalformedAnnounce)
        );
    }

    #[test]
    fn uid_roundtrip_and_rejects() {
        let uid = BadgeUid::from_bytes([1, 2, 3, 4]);
        assert_eq!(BadgeUid::from_slice(uid.as_bytes()).unwrap(), uid);
        assert_eq!(BadgeUid::from_slice(&[1, 2, 3]), Err(WireError::MalformedUid));
    }
}
