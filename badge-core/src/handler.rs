//! Wire protocol state machine. Owns both serial links, senses topology,
//! runs discovery, and relays application messages while RUNNING.
//!
//! Everything happens synchronously inside `run`, which the host must
//! invoke at a steady rate. Multi-tick waits are explicit counters and
//! timestamps compared against the tick's current time.

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::frame::{encode, Deframer, Frame};
use crate::link::{Direction, Link, LinkPosition};
use crate::message::{
    is_application, Announce, AnnounceReply, Payload, MAX_PEERS, TYPE_ANNOUNCE,
    TYPE_ANNOUNCE_REPLY, TYPE_MONITOR, TYPE_RESET,
};

/// Milliseconds since an arbitrary epoch, supplied by the host scheduler.
pub type AbsoluteTimeMs = u64;

/// Sequential identity within the current chain. Valid only while the
/// wire protocol is RUNNING; recomputed from scratch on every topology
/// change.
pub type PeerId = u8;

/// How the application wants the relay to treat a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Consume the message here.
    Swallow,
    /// Relay it onward, away from the side it arrived on.
    Forward,
    /// Abandon the chain state and force rediscovery.
    Reset,
}

/// Outcome of `enqueue_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    /// No route exists yet: the wire protocol is not RUNNING.
    Unconnected,
    /// A previous message has not been drained onto the wire yet.
    Full,
}

/// Chain-wide protocol phase this node believes it is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireState {
    Unconnected,
    /// Left-most only: let the neighbors enter listening mode before
    /// originating discovery.
    WaitToSendAnnounce,
    /// Establish position, peer count and peer id.
    Discovery,
    /// Application controlled, with automatic monitoring.
    Running,
}

/// Application-side event sink, supplied to every `run` call. Callbacks
/// must not re-enter the handler; sends requested from inside a callback
/// are deferred and enqueued after `run` returns.
pub trait NetworkNotifier {
    fn on_disconnection(&mut self);
    fn on_pairing_begin(&mut self);
    fn on_pairing_end(&mut self, peer_id: PeerId, peer_count: u8);
    /// Application-type messages only; wire-internal types are never
    /// surfaced here.
    fn on_message_received(&mut self, msg_type: u8, payload: &[u8]) -> MessageAction;
    fn on_message_sent(&mut self);
}

/// Internal result space of the per-state message handlers. The first
/// three variants mirror `MessageAction`; the rest are wire-internal and
/// never surfaced to the application.
enum HandleResult {
    Swallow,
    Forward,
    Reset,
    SendAnnounce,
    SendAnnounceReply,
    /// The relayed message reached this chain endpoint: the neighbor's
    /// turn ended here and the wave front turns around.
    EndOfPeerTurn,
}

#[derive(PartialEq, Eq)]
enum CheckConnectionsResult {
    NoChange,
    TopologyChanged,
}

struct PendingMessage {
    direction: Direction,
    wire_type: u8,
    payload: Payload,
}

/// One badge's view of the chain. Statically sized; the only buffers are
/// the per-link deframers and the single outgoing slot.
pub struct NetworkHandler<L: Link> {
    left: L,
    right: L,
    config: Config,

    left_rx: Deframer,
    right_rx: Deframer,

    left_connected: bool,
    right_connected: bool,
    position: LinkPosition,
    state: WireState,
    wave_front: Direction,
    listening_side: Direction,
    /// Ticks spent in the current state; only the wait state reads it.
    ticks_in_state: u8,

    peer_id: Option<PeerId>,
    peer_count: u8,

    pending: Option<PendingMessage>,
    last_monitor_rx: AbsoluteTimeMs,
    last_monitor_tx: AbsoluteTimeMs,
}

impl<L: Link> NetworkHandler<L> {
    pub fn new(left: L, right: L, config: Config) -> Self {
        Self {
            left,
            right,
            config,
            left_rx: Deframer::new(),
            right_rx: Deframer::new(),
            left_connected: false,
            right_connected: false,
            position: LinkPosition::Unknown,
            state: WireState::Unconnected,
            wave_front: Direction::Right,
            listening_side: Direction::Left,
            ticks_in_state: 0,
            peer_id: None,
            peer_count: 0,
            pending: None,
            last_monitor_rx: 0,
            last_monitor_tx: 0,
        }
    }

    /// One-time hardware initialization. Connectivity is deliberately not
    /// sensed here: the first `run` observes it as a topology change and
    /// enters discovery through the normal path.
    pub fn setup(&mut self) {
        trace!("network handler setup");
        self.left_rx.reset();
        self.right_rx.reset();
    }

    pub fn state(&self) -> WireState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WireState::Running
    }

    pub fn position(&self) -> LinkPosition {
        self.position
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn peer_count(&self) -> u8 {
        self.peer_count
    }

    /// Buffer one application message for the next send window. At most
    /// one message is in flight per handler; `Full` makes backpressure
    /// explicit to the caller, who retries after the message-sent
    /// notification. Payloads over the configured cap are refused as a
    /// capacity error.
    pub fn enqueue_message(
        &mut self,
        direction: Direction,
        msg_type: u8,
        payload: &[u8],
    ) -> EnqueueResult {
        if self.state != WireState::Running {
            return EnqueueResult::Unconnected;
        }
        if self.pending.is_some() {
            return EnqueueResult::Full;
        }
        if payload.len() > self.config.payload_cap() as usize {
            warn!(len = payload.len(), "payload exceeds configured cap");
            return EnqueueResult::Full;
        }
        let msg_type = msg_type & 0x07;
        debug_assert!(is_application(msg_type), "reserved wire type");
        let Ok(p) = Payload::from_slice(payload) else {
            return EnqueueResult::Full;
        };
        self.pending = Some(PendingMessage {
            direction,
            wire_type: msg_type,
            payload: p,
        });
        EnqueueResult::Queued
    }

    /// One cooperative tick. Not reentrant; must be called at a steady
    /// minimum rate for the wait window and monitor timeout to behave.
    pub fn run(&mut self, now: AbsoluteTimeMs, notifier: &mut dyn NetworkNotifier) {
        if self.check_connections() == CheckConnectionsResult::TopologyChanged {
            debug!(
                left = self.left_connected,
                right = self.right_connected,
                "topology changed"
            );
            self.broadcast_reset();
            self.restart(notifier);
            return;
        }
        match self.state {
            WireState::Unconnected => {}
            WireState::WaitToSendAnnounce => self.run_wait(now, notifier),
            WireState::Discovery => self.poll_and_dispatch(now, notifier),
            WireState::Running => self.run_running(now, notifier),
        }
    }

    fn check_connections(&mut self) -> CheckConnectionsResult {
        let left = self.left.connected();
        let right = self.right.connected();
        if left == self.left_connected && right == self.right_connected {
            return CheckConnectionsResult::NoChange;
        }
        self.left_connected = left;
        self.right_connected = right;
        CheckConnectionsResult::TopologyChanged
    }

    /// Tear everything down, then re-enter the protocol from the current
    /// sensed position. Every failure path ends here.
    fn restart(&mut self, notifier: &mut dyn NetworkNotifier) {
        let was_active = self.state != WireState::Unconnected;
        let had_pairing = self.state == WireState::Running;
        self.set_state(WireState::Unconnected);
        self.peer_id = None;
        self.peer_count = 0;
        self.pending = None;
        self.ticks_in_state = 0;
        self.left_rx.reset();
        self.right_rx.reset();
        // Discard stale bytes buffered before the reset.
        while self.left.read_byte().is_some() {}
        while self.right.read_byte().is_some() {}
        self.position = LinkPosition::from_sensed(self.left_connected, self.right_connected);
        debug!(position = ?self.position, "position detected");
        // Mid-discovery restarts (a neighbor's RESET crossing ours) are
        // not disconnections: the application only hears about a lost
        // pairing or a lost neighbor.
        if had_pairing || (was_active && self.position == LinkPosition::Unknown) {
            notifier.on_disconnection();
        }
        match self.position {
            LinkPosition::Unknown => {}
            LinkPosition::LeftMost => {
                // Only the left-most node originates discovery.
                self.peer_id = Some(0);
                self.peer_count = 1;
                self.wave_front = Direction::Right;
                self.listening_side = Direction::Right;
                self.set_state(WireState::WaitToSendAnnounce);
                notifier.on_pairing_begin();
            }
            LinkPosition::RightMost | LinkPosition::Middle => {
                self.wave_front = Direction::Right;
                self.listening_side = Direction::Left;
                self.set_state(WireState::Discovery);
                notifier.on_pairing_begin();
            }
        }
    }

    fn run_wait(&mut self, now: AbsoluteTimeMs, notifier: &mut dyn NetworkNotifier) {
        // A RESET (or out-of-phase traffic) can still arrive while waiting.
        self.poll_and_dispatch(now, notifier);
        if self.state != WireState::WaitToSendAnnounce {
            return;
        }
        self.ticks_in_state = self.ticks_in_state.saturating_add(1);
        if self.ticks_in_state >= self.config.announce_wait_ticks {
            self.send_announce(notifier);
            self.set_state(WireState::Discovery);
        }
    }

    fn run_running(&mut self, now: AbsoluteTimeMs, notifier: &mut dyn NetworkNotifier) {
        // Drain the outgoing slot first so the send window frees it for
        // this tick's relaying.
        if let Some(msg) = self.pending.take() {
            self.write_message(msg.direction, msg.wire_type, msg.payload.as_slice());
            notifier.on_message_sent();
        }
        self.poll_and_dispatch(now, notifier);
        if self.state != WireState::Running {
            return;
        }
        // Alternate which link is drained first so a busy side cannot
        // starve the other of its keepalives.
        self.listening_side = self.listening_side.opposite();
        if now.saturating_sub(self.last_monitor_tx) >= self.config.monitor_period_ms {
            self.write_message(Direction::Left, TYPE_MONITOR, &[]);
            self.write_message(Direction::Right, TYPE_MONITOR, &[]);
            self.last_monitor_tx = now;
        }
        if now.saturating_sub(self.last_monitor_rx) > self.config.monitor_timeout_ms {
            warn!("monitor timeout, link presumed dead");
            self.broadcast_reset();
            self.restart(notifier);
        }
    }

    /// Drain inbound bytes from both links, listening side first, and
    /// dispatch completed frames. Stops at a state change, or once the
    /// outgoing slot is occupied by a forward: undelivered frames stay in
    /// the link buffer until the slot drains.
    fn poll_and_dispatch(&mut self, now: AbsoluteTimeMs, notifier: &mut dyn NetworkNotifier) {
        let entered = self.state;
        for side in [self.listening_side, self.listening_side.opposite()] {
            while self.state == entered && self.pending.is_none() {
                let Some(frame) = self.poll_side(side) else {
                    break;
                };
                self.dispatch(side, frame, now, notifier);
            }
            if self.state != entered {
                return;
            }
        }
    }

    fn poll_side(&mut self, side: Direction) -> Option<Frame> {
        loop {
            let byte = match side {
                Direction::Left => self.left.read_byte(),
                Direction::Right => self.right.read_byte(),
            }?;
            let deframer = match side {
                Direction::Left => &mut self.left_rx,
                Direction::Right => &mut self.right_rx,
            };
            if let Some(frame) = deframer.push(byte) {
                return Some(frame);
            }
        }
    }

    fn dispatch(
        &mut self,
        side: Direction,
        frame: Frame,
        now: AbsoluteTimeMs,
        notifier: &mut dyn NetworkNotifier,
    ) {
        trace!(?side, wire_type = frame.wire_type, len = frame.payload.len(), "frame received");
        // A RESET is honored in every state: forward it away from its
        // arrival side, then abandon whatever was in progress.
        if frame.wire_type == TYPE_RESET {
            let onward = side.opposite();
            if self.link_connected(onward) {
                self.write_message(onward, TYPE_RESET, &[]);
            }
            self.restart(notifier);
            return;
        }
        let result = match self.state {
            WireState::WaitToSendAnnounce | WireState::Discovery => {
                self.discovery_handle_message(side, &frame, now, notifier)
            }
            WireState::Running => self.running_handle_message(side, &frame, now, notifier),
            WireState::Unconnected => HandleResult::Swallow,
        };
        self.apply_result(result, side, &frame, notifier);
    }

    fn discovery_handle_message(
        &mut self,
        side: Direction,
        frame: &Frame,
        now: AbsoluteTimeMs,
        notifier: &mut dyn NetworkNotifier,
    ) -> HandleResult {
        match frame.wire_type {
            // Stale keepalive from a neighbor that has not reset yet.
            TYPE_MONITOR => HandleResult::Swallow,
            TYPE_ANNOUNCE => {
                // Only an unassigned node expects the announce, and only
                // from its left.
                if self.state != WireState::Discovery
                    || side != Direction::Left
                    || self.peer_id.is_some()
                {
                    return HandleResult::Reset;
                }
                let Ok(announce) = Announce::decode(frame.payload.as_slice()) else {
                    return HandleResult::Reset;
                };
                if announce.next_peer_id >= MAX_PEERS {
                    return HandleResult::Reset;
                }
                self.peer_id = Some(announce.next_peer_id);
                self.peer_count = announce.next_peer_id + 1;
                debug!(peer_id = announce.next_peer_id, "identity assigned");
                if self.position == LinkPosition::Middle {
                    HandleResult::SendAnnounce
                } else {
                    // Right-most: the wave front turns around here and the
                    // peer count is final.
                    self.wave_front = Direction::Left;
                    self.enter_running(now, notifier);
                    HandleResult::SendAnnounceReply
                }
            }
            TYPE_ANNOUNCE_REPLY => {
                if self.state != WireState::Discovery
                    || side != Direction::Right
                    || self.peer_id.is_none()
                {
                    return HandleResult::Reset;
                }
                let Ok(reply) = AnnounceReply::decode(frame.payload.as_slice()) else {
                    return HandleResult::Reset;
                };
                if reply.peer_count == 0 || reply.peer_count > MAX_PEERS {
                    return HandleResult::Reset;
                }
                self.peer_count = reply.peer_count;
                self.wave_front = Direction::Left;
                let forward = self.position == LinkPosition::Middle;
                self.enter_running(now, notifier);
                if forward {
                    HandleResult::SendAnnounceReply
                } else {
                    HandleResult::Swallow
                }
            }
            // Application traffic before discovery completes: a malformed
            // neighbor is indistinguishable from a miswired one.
            _ => HandleResult::Reset,
        }
    }

    fn running_handle_message(
        &mut self,
        side: Direction,
        frame: &Frame,
        now: AbsoluteTimeMs,
        notifier: &mut dyn NetworkNotifier,
    ) -> HandleResult {
        match frame.wire_type {
            TYPE_MONITOR => {
                self.last_monitor_rx = now;
                HandleResult::Swallow
            }
            t if is_application(t) => {
                match notifier.on_message_received(t, frame.payload.as_slice()) {
                    MessageAction::Swallow => HandleResult::Swallow,
                    MessageAction::Reset => HandleResult::Reset,
                    MessageAction::Forward => {
                        let onward = side.opposite();
                        if self.link_connected(onward) {
                            HandleResult::Forward
                        } else {
                            HandleResult::EndOfPeerTurn
                        }
                    }
                }
            }
            // Discovery messages while RUNNING are a protocol violation.
            _ => HandleResult::Reset,
        }
    }

    fn apply_result(
        &mut self,
        result: HandleResult,
        side: Direction,
        frame: &Frame,
        notifier: &mut dyn NetworkNotifier,
    ) {
        match result {
            HandleResult::Swallow => {}
            HandleResult::Reset => self.force_rediscovery(notifier),
            HandleResult::Forward => {
                // Guaranteed free: inbound is only polled while the slot
                // is empty.
                self.pending = Some(PendingMessage {
                    direction: side.opposite(),
                    wire_type: frame.wire_type,
                    payload: frame.payload,
                });
            }
            HandleResult::EndOfPeerTurn => {
                // The token died at this endpoint; its turn ends and the
                // wave front turns around. The application still observes
                // the send completing.
                self.wave_front = self.wave_front.opposite();
                trace!(wave_front = ?self.wave_front, "end of peer turn");
                notifier.on_message_sent();
            }
            HandleResult::SendAnnounce => self.send_announce(notifier),
            HandleResult::SendAnnounceReply => {
                let reply = AnnounceReply {
                    peer_count: self.peer_count,
                };
                self.write_message(
                    Direction::Left,
                    TYPE_ANNOUNCE_REPLY,
                    reply.encode().as_slice(),
                );
            }
        }
    }

    /// Send (or continue) the discovery announce toward the unvisited
    /// side, offering the next sequential identity.
    fn send_announce(&mut self, notifier: &mut dyn NetworkNotifier) {
        let Some(id) = self.peer_id else {
            return self.force_rediscovery(notifier);
        };
        let announce = Announce {
            next_peer_id: id + 1,
            peer_count: self.peer_count,
        };
        self.write_message(Direction::Right, TYPE_ANNOUNCE, announce.encode().as_slice());
        self.listening_side = Direction::Right;
    }

    fn enter_running(&mut self, now: AbsoluteTimeMs, notifier: &mut dyn NetworkNotifier) {
        self.set_state(WireState::Running);
        self.last_monitor_rx = now;
        self.last_monitor_tx = now;
        let Some(id) = self.peer_id else {
            return self.force_rediscovery(notifier);
        };
        debug!(peer_id = id, peer_count = self.peer_count, "discovery complete");
        notifier.on_pairing_end(id, self.peer_count);
    }

    /// Defensive reset: tell both neighbors to rediscover, then restart.
    fn force_rediscovery(&mut self, notifier: &mut dyn NetworkNotifier) {
        warn!(state = ?self.state, "protocol reset, forcing rediscovery");
        self.broadcast_reset();
        self.restart(notifier);
    }

    fn broadcast_reset(&mut self) {
        if self.left_connected {
            self.write_message(Direction::Left, TYPE_RESET, &[]);
        }
        if self.right_connected {
            self.write_message(Direction::Right, TYPE_RESET, &[]);
        }
    }

    fn link_connected(&self, side: Direction) -> bool {
        match side {
            Direction::Left => self.left_connected,
            Direction::Right => self.right_connected,
        }
    }

    fn write_message(&mut self, direction: Direction, wire_type: u8, payload: &[u8]) {
        if let Ok((buf, n)) = encode(wire_type, payload) {
            match direction {
                Direction::Left => self.left.write(&buf[..n]),
                Direction::Right => self.right.write(&buf[..n]),
            }
        }
    }

    fn set_state(&mut self, state: WireState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "wire protocol state");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackLink, PlugHandle};
    use crate::message::TYPE_ID_EXCHANGE;
    use rand::seq::SliceRandom;

    const TICK_MS: u64 = 10;

    fn test_config() -> Config {
        Config {
            monitor_period_ms: 50,
            monitor_timeout_ms: 300,
            ..Config::default()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        disconnections: u32,
        pairing_begun: u32,
        pairing_end: Option<(PeerId, u8)>,
        received: Vec<(u8, Vec<u8>)>,
        sent: u32,
        swallow: bool,
    }

    impl NetworkNotifier for RecordingNotifier {
        fn on_disconnection(&mut self) {
            self.disconnections += 1;
        }
        fn on_pairing_begin(&mut self) {
            self.pairing_begun += 1;
        }
        fn on_pairing_end(&mut self, peer_id: PeerId, peer_count: u8) {
            self.pairing_end = Some((peer_id, peer_count));
        }
        fn on_message_received(&mut self, msg_type: u8, payload: &[u8]) -> MessageAction {
            self.received.push((msg_type, payload.to_vec()));
            if self.swallow {
                MessageAction::Swallow
            } else {
                MessageAction::Forward
            }
        }
        fn on_message_sent(&mut self) {
            self.sent += 1;
        }
    }

    struct TestNode {
        handler: NetworkHandler<LoopbackLink>,
        app: RecordingNotifier,
    }

    /// Wire n handlers into a linear chain. All cables start unplugged.
    fn build_chain(n: usize) -> (Vec<TestNode>, Vec<PlugHandle>) {
        let mut plugs = Vec::with_capacity(n - 1);
        let mut lefts = Vec::with_capacity(n);
        let mut rights = Vec::with_capacity(n);
        lefts.push(LoopbackLink::unplugged());
        for _ in 0..n - 1 {
            let (right, left, plug) = LoopbackLink::pair();
            rights.push(right);
            lefts.push(left);
            plugs.push(plug);
        }
        rights.push(LoopbackLink::unplugged());
        let nodes = lefts
            .into_iter()
            .zip(rights)
            .map(|(left, right)| TestNode {
                handler: NetworkHandler::new(left, right, test_config()),
                app: RecordingNotifier::default(),
            })
            .collect();
        (nodes, plugs)
    }

    fn run_ticks(nodes: &mut [TestNode], from: u64, count: u64) -> u64 {
        for t in from..from + count {
            for node in nodes.iter_mut() {
                node.handler.run(t * TICK_MS, &mut node.app);
            }
        }
        from + count
    }

    fn plug_all(plugs: &[PlugHandle]) {
        for p in plugs {
            p.set(true);
        }
    }

    #[test]
    fn three_node_chain_discovers_distinct_identities() {
        let (mut nodes, plugs) = build_chain(3);
        plug_all(&plugs);
        run_ticks(&mut nodes, 0, 50);
        for (i, node) in nodes.iter().enumerate() {
            assert!(node.handler.is_running(), "node {} not running", i);
            assert_eq!(node.handler.peer_id(), Some(i as u8));
            assert_eq!(node.handler.peer_count(), 3);
            assert_eq!(node.app.pairing_end, Some((i as u8, 3)));
            assert!(node.app.pairing_begun >= 1);
        }
        assert_eq!(nodes[0].handler.position(), LinkPosition::LeftMost);
        assert_eq!(nodes[1].handler.position(), LinkPosition::Middle);
        assert_eq!(nodes[2].handler.position(), LinkPosition::RightMost);
    }

    #[test]
    fn chains_converge_in_any_join_order() {
        let mut rng = rand::thread_rng();
        for &n in &[2usize, 5, 17, 31] {
            let (mut nodes, mut plugs) = build_chain(n);
            plugs.shuffle(&mut rng);
            let mut t = 0;
            for plug in &plugs {
                plug.set(true);
                t = run_ticks(&mut nodes, t, 5);
            }
            run_ticks(&mut nodes, t, 1000);
            let mut ids: Vec<u8> = nodes
                .iter()
                .map(|node| {
                    assert!(node.handler.is_running(), "n={} node not running", n);
                    assert_eq!(node.handler.peer_count(), n as u8);
                    node.handler.peer_id().expect("id assigned")
                })
                .collect();
            ids.sort_unstable();
            let expected: Vec<u8> = (0..n as u8).collect();
            assert_eq!(ids, expected, "n={}", n);
        }
    }

    #[test]
    fn leftmost_waits_before_announcing() {
        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        // One tick to sense, one in the wait window: nothing announced yet.
        run_ticks(&mut nodes, 0, 2);
        assert_eq!(nodes[0].handler.state(), WireState::WaitToSendAnnounce);
        assert_eq!(nodes[1].handler.peer_id(), None);
        run_ticks(&mut nodes, 2, 20);
        assert!(nodes[0].handler.is_running());
        assert!(nodes[1].handler.is_running());
        assert_eq!(nodes[1].handler.peer_id(), Some(1));
        assert_eq!(nodes[0].handler.peer_count(), 2);
    }

    #[test]
    fn topology_change_resets_every_node_exactly_once() {
        let (mut nodes, plugs) = build_chain(3);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 50);
        assert!(nodes.iter().all(|n| n.handler.is_running()));

        // Pull the cable between node 1 and node 2.
        plugs[1].set(false);
        run_ticks(&mut nodes, t, 60);

        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.app.disconnections, 1, "node {}", i);
        }
        // The severed pair re-forms a two-badge chain; the orphan stays
        // unconnected with no stale identity.
        assert!(nodes[0].handler.is_running());
        assert!(nodes[1].handler.is_running());
        assert_eq!(nodes[0].handler.peer_count(), 2);
        assert_eq!(nodes[1].handler.peer_count(), 2);
        assert_eq!(nodes[1].handler.peer_id(), Some(1));
        assert_eq!(nodes[2].handler.state(), WireState::Unconnected);
        assert_eq!(nodes[2].handler.peer_id(), None);
    }

    #[test]
    fn single_slot_backpressure() {
        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 20);
        assert!(nodes[0].handler.is_running());
        nodes[1].app.swallow = true;

        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[1, 2]),
            EnqueueResult::Queued
        );
        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[3]),
            EnqueueResult::Full
        );
        let t = run_ticks(&mut nodes, t, 2);
        assert_eq!(nodes[0].app.sent, 1);
        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[3]),
            EnqueueResult::Queued
        );
        run_ticks(&mut nodes, t, 2);
        assert_eq!(nodes[1].app.received.len(), 2);
        assert_eq!(nodes[1].app.received[0].1, vec![1, 2]);
    }

    #[test]
    fn enqueue_refused_without_a_route() {
        let (mut nodes, _plugs) = build_chain(2);
        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[1]),
            EnqueueResult::Unconnected
        );
    }

    #[test]
    fn oversized_payload_is_a_capacity_error() {
        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        run_ticks(&mut nodes, 0, 20);
        assert!(nodes[0].handler.is_running());
        let too_big = [0u8; 32];
        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &too_big),
            EnqueueResult::Full
        );
    }

    #[test]
    fn message_relays_across_the_chain() {
        let (mut nodes, plugs) = build_chain(3);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 50);
        nodes[2].app.swallow = true;

        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[7, 7, 7]),
            EnqueueResult::Queued
        );
        run_ticks(&mut nodes, t, 10);
        // The middle node saw it and relayed; the end node swallowed it.
        assert_eq!(nodes[1].app.received.len(), 1);
        assert_eq!(nodes[2].app.received.len(), 1);
        assert_eq!(nodes[2].app.received[0].1, vec![7, 7, 7]);
        // Forward completion fired message-sent on the relay.
        assert_eq!(nodes[1].app.sent, 1);
    }

    #[test]
    fn forward_at_the_chain_end_completes_the_turn() {
        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 20);
        // Node 1 forwards, but there is no right link: the message dies
        // at the endpoint and the send still completes.
        assert_eq!(
            nodes[0]
                .handler
                .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[1]),
            EnqueueResult::Queued
        );
        run_ticks(&mut nodes, t, 5);
        assert_eq!(nodes[1].app.received.len(), 1);
        assert_eq!(nodes[1].app.sent, 1);
        assert!(nodes[1].handler.is_running());
    }

    #[test]
    fn monitor_timeout_detects_a_silent_neighbor() {
        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 20);
        assert!(nodes[0].handler.is_running());

        // Node 1 goes silent (stops being ticked) without unplugging.
        for tick in t..t + 60 {
            let node = &mut nodes[0];
            node.handler.run(tick * TICK_MS, &mut node.app);
        }
        assert_eq!(nodes[0].app.disconnections, 1);
        assert!(!nodes[0].handler.is_running());
    }

    #[test]
    fn app_requested_reset_forces_rediscovery() {
        struct ResetOnce {
            inner: RecordingNotifier,
            armed: bool,
        }
        impl NetworkNotifier for ResetOnce {
            fn on_disconnection(&mut self) {
                self.inner.on_disconnection();
            }
            fn on_pairing_begin(&mut self) {
                self.inner.on_pairing_begin();
            }
            fn on_pairing_end(&mut self, id: PeerId, count: u8) {
                self.inner.on_pairing_end(id, count);
            }
            fn on_message_received(&mut self, t: u8, p: &[u8]) -> MessageAction {
                self.inner.received.push((t, p.to_vec()));
                if self.armed {
                    self.armed = false;
                    MessageAction::Reset
                } else {
                    MessageAction::Swallow
                }
            }
            fn on_message_sent(&mut self) {
                self.inner.on_message_sent();
            }
        }

        let (mut nodes, plugs) = build_chain(2);
        plug_all(&plugs);
        let t = run_ticks(&mut nodes, 0, 20);
        assert!(nodes[1].handler.is_running());

        let mut app1 = ResetOnce {
            inner: RecordingNotifier::default(),
            armed: true,
        };
        nodes[0]
            .handler
            .enqueue_message(Direction::Right, TYPE_ID_EXCHANGE, &[1]);
        for tick in t..t + 5 {
            let (a, b) = nodes.split_at_mut(1);
            a[0].handler.run(tick * TICK_MS, &mut a[0].app);
            b[0].handler.run(tick * TICK_MS, &mut app1);
        }
        // Node 1 demanded a reset; the RESET propagated to node 0 too and
        // both rediscover.
        assert_eq!(app1.inner.disconnections, 1);
        assert_eq!(nodes[0].app.disconnections, 1);
    }
}
