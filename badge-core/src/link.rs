//! Physical link abstraction and topology detection.

/// Relative direction of a neighbor, a message, or the wave front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// Structural role in the chain, derived purely from sensed connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPosition {
    Unknown,
    LeftMost,
    RightMost,
    Middle,
}

impl LinkPosition {
    pub fn from_sensed(left_connected: bool, right_connected: bool) -> Self {
        match (left_connected, right_connected) {
            (false, false) => LinkPosition::Unknown,
            (false, true) => LinkPosition::LeftMost,
            (true, false) => LinkPosition::RightMost,
            (true, true) => LinkPosition::Middle,
        }
    }

    /// Whether a neighbor is sensed on the given side.
    pub fn has_side(self, side: Direction) -> bool {
        match (self, side) {
            (LinkPosition::Middle, _) => true,
            (LinkPosition::LeftMost, Direction::Right) => true,
            (LinkPosition::RightMost, Direction::Left) => true,
            _ => false,
        }
    }
}

/// One point-to-point serial link, exclusively owned and driven by the
/// network handler. Reads are non-blocking: each tick drains whatever
/// bytes are currently buffered. Writes are fire-and-forget, matching
/// the underlying serial hardware.
pub trait Link {
    /// Electrical presence detection for this side, not protocol state.
    fn connected(&self) -> bool;
    fn read_byte(&mut self) -> Option<u8>;
    fn write(&mut self, bytes: &[u8]);
}
