//! Identity exchange, layered on the RUNNING-state relay. Each badge
//! broadcasts its UID exactly once per round; relayed copies carry every
//! UID past every other badge exactly once, so no badge ever sees a UID
//! twice and no badge sees its own UID come back.

use tracing::trace;

use crate::handler::{MessageAction, PeerId};
use crate::link::Direction;

/// Whether a reported identity was seen for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeDiscovered {
    New,
    AlreadyKnown,
}

/// Per-round token state. Created when pairing begins and reset when it
/// ends or is aborted; nothing here survives a disconnection.
#[derive(Debug, Default)]
pub struct IdExchanger {
    new_badges_discovered: u8,
    /// Identity messages seen this round, our own injection included.
    message_received_count: u8,
    /// Inject our UID once the current forward finishes draining.
    send_ours_on_next_send_complete: bool,
    /// Our UID currently occupies the outgoing slot.
    own_in_flight: bool,
    /// Side the next own-UID copy travels toward.
    direction: Option<Direction>,
    /// No second copy is owed after the current one.
    done_after_sending_ours: bool,
    /// Our UID has been injected (all owed copies sent).
    own_sent: bool,
    peer_count: u8,
    /// Deferred send, drained by the badge after the handler's tick.
    pending_send: Option<Direction>,
}

impl IdExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the round and clear all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Arm the round once discovery has delivered our identity and the
    /// chain's peer count. The origin (id 0) injects immediately; every
    /// other node injects after its first relayed send completes.
    pub fn begin_round(&mut self, peer_id: PeerId, peer_count: u8) {
        self.reset();
        self.peer_count = peer_count;
        if peer_count <= 1 {
            // Degenerate chain; nothing to exchange.
            self.own_sent = true;
            self.message_received_count = peer_count;
            return;
        }
        if peer_id == 0 {
            // Origin: only a right link exists, one copy suffices.
            self.direction = Some(Direction::Right);
            self.done_after_sending_ours = true;
            self.pending_send = Some(Direction::Right);
        } else {
            // First copy goes left; middle nodes owe a rightward copy too.
            self.direction = Some(Direction::Left);
            self.done_after_sending_ours = peer_id + 1 == peer_count;
            self.send_ours_on_next_send_complete = true;
        }
        trace!(peer_id, peer_count, "identity exchange round armed");
    }

    /// An identity message arrived (already deduplicated by the badge).
    /// Always relays onward; the chain ends drop it.
    pub fn new_message(&mut self, discovered: BadgeDiscovered) -> MessageAction {
        self.message_received_count = self.message_received_count.saturating_add(1);
        if discovered == BadgeDiscovered::New {
            self.new_badges_discovered = self.new_badges_discovered.saturating_add(1);
        }
        MessageAction::Forward
    }

    /// A send window completed: either a relayed message or one of our
    /// own UID copies left the slot.
    pub fn message_sent(&mut self) {
        if self.own_in_flight {
            self.own_in_flight = false;
            if self.done_after_sending_ours {
                self.own_sent = true;
                // Our own injection counts toward the round total once.
                self.message_received_count = self.message_received_count.saturating_add(1);
            } else {
                // Left copy done; the rightward copy is still owed.
                self.direction = Some(Direction::Right);
                self.done_after_sending_ours = true;
                self.pending_send = Some(Direction::Right);
            }
        } else if self.send_ours_on_next_send_complete {
            self.send_ours_on_next_send_complete = false;
            self.pending_send = self.direction;
        }
    }

    /// Deferred own-UID send, if one is owed. Stays set until
    /// `own_queued` confirms the slot accepted it.
    pub fn pending_send(&self) -> Option<Direction> {
        self.pending_send
    }

    /// The badge managed to enqueue our UID toward `pending_send`.
    pub fn own_queued(&mut self) {
        self.pending_send = None;
        self.own_in_flight = true;
    }

    /// One full token traversal finished: every peer's identity seen,
    /// our own injected.
    pub fn round_complete(&self) -> bool {
        self.own_sent && self.message_received_count >= self.peer_count && self.peer_count > 0
    }

    pub fn new_badges_discovered(&self) -> u8 {
        self.new_badges_discovered
    }

    pub fn message_received_count(&self) -> u8 {
        self.message_received_count
    }
}
