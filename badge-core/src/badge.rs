//! Badge-level application layer: glues the wire protocol to the
//! identity exchange, tracks which badges this one has ever met, and
//! drives the pairing animation once a round completes.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exchanger::{BadgeDiscovered, IdExchanger};
use crate::handler::{
    AbsoluteTimeMs, EnqueueResult, MessageAction, NetworkHandler, NetworkNotifier, PeerId,
};
use crate::link::Link;
use crate::message::{BadgeUid, MAX_PEERS, TYPE_ID_EXCHANGE};

/// Application-visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAppState {
    Unconnected,
    /// Chain formed, identity round in progress.
    ExchangingIds,
    /// Round done, pairing animation playing.
    AnimatePairing,
    /// Connected and quiet.
    Idle,
}

/// Pairing animation phases, advanced one tick at a time. The host reads
/// the current phase to drive its display; the core only times it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationPhase {
    WaitMessagePart1,
    LightUpUpperBar,
    LightUpLowerBar,
    WaitMessagePart2,
    WaitDone,
    Done,
}

const WAIT_MESSAGE_TICKS: u8 = 8;
const LIGHT_UP_TICKS: u8 = 16;
const WAIT_DONE_TICKS: u8 = 8;

#[derive(Debug)]
pub struct PairingAnimator {
    phase: AnimationPhase,
    ticks_in_phase: u8,
}

impl PairingAnimator {
    fn new() -> Self {
        Self {
            phase: AnimationPhase::Done,
            ticks_in_phase: 0,
        }
    }

    fn start(&mut self) {
        self.phase = AnimationPhase::WaitMessagePart1;
        self.ticks_in_phase = 0;
    }

    fn reset(&mut self) {
        self.phase = AnimationPhase::Done;
        self.ticks_in_phase = 0;
    }

    pub fn phase(&self) -> AnimationPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == AnimationPhase::Done
    }

    fn tick(&mut self) {
        let budget = match self.phase {
            AnimationPhase::WaitMessagePart1 | AnimationPhase::WaitMessagePart2 => {
                WAIT_MESSAGE_TICKS
            }
            AnimationPhase::LightUpUpperBar | AnimationPhase::LightUpLowerBar => LIGHT_UP_TICKS,
            AnimationPhase::WaitDone => WAIT_DONE_TICKS,
            AnimationPhase::Done => return,
        };
        self.ticks_in_phase += 1;
        if self.ticks_in_phase < budget {
            return;
        }
        self.ticks_in_phase = 0;
        self.phase = match self.phase {
            AnimationPhase::WaitMessagePart1 => AnimationPhase::LightUpUpperBar,
            AnimationPhase::LightUpUpperBar => AnimationPhase::LightUpLowerBar,
            AnimationPhase::LightUpLowerBar => AnimationPhase::WaitMessagePart2,
            AnimationPhase::WaitMessagePart2 => AnimationPhase::WaitDone,
            AnimationPhase::WaitDone => AnimationPhase::Done,
            AnimationPhase::Done => AnimationPhase::Done,
        };
    }
}

/// Event sink handed to the network handler. Split from `Badge` so the
/// handler can borrow it mutably while it owns the links.
struct BadgeApp {
    state: NetworkAppState,
    uid: BadgeUid,
    peer_id: Option<PeerId>,
    peer_count: u8,
    exchanger: IdExchanger,
    animator: PairingAnimator,
    seen: [Option<BadgeUid>; MAX_PEERS as usize],
    seen_len: u8,
}

impl BadgeApp {
    fn new(uid: BadgeUid) -> Self {
        Self {
            state: NetworkAppState::Unconnected,
            uid,
            peer_id: None,
            peer_count: 0,
            exchanger: IdExchanger::new(),
            animator: PairingAnimator::new(),
            seen: [None; MAX_PEERS as usize],
            seen_len: 0,
        }
    }

    fn set_state(&mut self, state: NetworkAppState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "badge state");
            self.state = state;
        }
    }

    /// Record an identity from the wire. Ever-seen badges and our own
    /// UID echoing back are not new.
    fn on_badge_discovered(&mut self, uid: BadgeUid) -> BadgeDiscovered {
        if uid == self.uid {
            return BadgeDiscovered::AlreadyKnown;
        }
        if self.seen[..self.seen_len as usize]
            .iter()
            .any(|slot| *slot == Some(uid))
        {
            return BadgeDiscovered::AlreadyKnown;
        }
        if (self.seen_len as usize) < self.seen.len() {
            self.seen[self.seen_len as usize] = Some(uid);
            self.seen_len += 1;
        }
        info!(uid = ?uid, "new badge discovered");
        BadgeDiscovered::New
    }
}

impl NetworkNotifier for BadgeApp {
    fn on_disconnection(&mut self) {
        self.exchanger.reset();
        self.animator.reset();
        self.peer_id = None;
        self.peer_count = 0;
        self.set_state(NetworkAppState::Unconnected);
    }

    fn on_pairing_begin(&mut self) {
        self.exchanger.reset();
        self.animator.reset();
        self.set_state(NetworkAppState::ExchangingIds);
    }

    fn on_pairing_end(&mut self, peer_id: PeerId, peer_count: u8) {
        self.peer_id = Some(peer_id);
        self.peer_count = peer_count;
        self.exchanger.begin_round(peer_id, peer_count);
    }

    fn on_message_received(&mut self, msg_type: u8, payload: &[u8]) -> MessageAction {
        if msg_type != TYPE_ID_EXCHANGE {
            // Unknown application traffic relays transparently.
            return MessageAction::Forward;
        }
        match self.state {
            NetworkAppState::ExchangingIds => {
                let Ok(uid) = BadgeUid::from_slice(payload) else {
                    warn!(len = payload.len(), "malformed identity payload");
                    return MessageAction::Reset;
                };
                let discovered = self.on_badge_discovered(uid);
                self.exchanger.new_message(discovered)
            }
            // Stragglers from slower neighbors still need relaying.
            NetworkAppState::AnimatePairing | NetworkAppState::Idle => MessageAction::Forward,
            NetworkAppState::Unconnected => MessageAction::Swallow,
        }
    }

    fn on_message_sent(&mut self) {
        self.exchanger.message_sent();
    }
}

/// One badge: the wire protocol plus its application state, advanced by
/// calling `tick` at a steady rate.
pub struct Badge<L: Link> {
    net: NetworkHandler<L>,
    app: BadgeApp,
}

impl<L: Link> Badge<L> {
    pub fn new(left: L, right: L, config: Config, uid: BadgeUid) -> Self {
        Self {
            net: NetworkHandler::new(left, right, config),
            app: BadgeApp::new(uid),
        }
    }

    pub fn setup(&mut self) {
        self.net.setup();
    }

    pub fn uid(&self) -> BadgeUid {
        self.app.uid
    }

    pub fn state(&self) -> NetworkAppState {
        self.app.state
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.app.peer_id
    }

    pub fn peer_count(&self) -> u8 {
        self.app.peer_count
    }

    /// Badges first met during the current round.
    pub fn new_badges_discovered(&self) -> u8 {
        self.app.exchanger.new_badges_discovered()
    }

    /// Distinct badges ever met, across all rounds.
    pub fn known_badges(&self) -> u8 {
        self.app.seen_len
    }

    pub fn animation_phase(&self) -> AnimationPhase {
        self.app.animator.phase()
    }

    pub fn tick(&mut self, now: AbsoluteTimeMs) {
        self.net.run(now, &mut self.app);

        // Sends requested from inside notifier callbacks are deferred to
        // here; `Full` keeps the request armed for the next tick.
        if let Some(direction) = self.app.exchanger.pending_send() {
            let uid = self.app.uid;
            match self
                .net
                .enqueue_message(direction, TYPE_ID_EXCHANGE, uid.as_bytes())
            {
                EnqueueResult::Queued => self.app.exchanger.own_queued(),
                EnqueueResult::Full => {}
                EnqueueResult::Unconnected => self.app.exchanger.reset(),
            }
        }

        if self.app.state == NetworkAppState::ExchangingIds && self.app.exchanger.round_complete() {
            info!(
                new = self.app.exchanger.new_badges_discovered(),
                total = self.app.seen_len,
                "identity round complete"
            );
            self.app.animator.start();
            self.app.set_state(NetworkAppState::AnimatePairing);
        }

        if self.app.state == NetworkAppState::AnimatePairing {
            self.app.animator.tick();
            if self.app.animator.is_done() {
                self.app.set_state(NetworkAppState::Idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackLink, PlugHandle};

    const TICK_MS: u64 = 10;

    fn test_config() -> Config {
        Config {
            monitor_period_ms: 50,
            monitor_timeout_ms: 300,
            ..Config::default()
        }
    }

    fn build_badges(n: usize) -> (Vec<Badge<LoopbackLink>>, Vec<PlugHandle>) {
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
        let badges = lefts
            .into_iter()
            .zip(rights)
            .enumerate()
            .map(|(i, (left, right))| {
                let uid = BadgeUid::from_bytes([i as u8 + 1, 0xb0, 0x0c, i as u8]);
                let mut badge = Badge::new(left, right, test_config(), uid);
                badge.setup();
                badge
            })
            .collect();
        (badges, plugs)
    }

    fn run_ticks(badges: &mut [Badge<LoopbackLink>], from: u64, count: u64) -> u64 {
        for t in from..from + count {
            for badge in badges.iter_mut() {
                badge.tick(t * TICK_MS);
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
    fn two_badges_meet_exactly_once() {
        let (mut badges, plugs) = build_badges(2);
        plug_all(&plugs);
        run_ticks(&mut badges, 0, 200);
        for (i, badge) in badges.iter().enumerate() {
            assert_eq!(badge.state(), NetworkAppState::Idle, "badge {}", i);
            assert_eq!(badge.new_badges_discovered(), 1, "badge {}", i);
            assert_eq!(badge.known_badges(), 1, "badge {}", i);
        }
        assert_eq!(badges[0].peer_id(), Some(0));
        assert_eq!(badges[1].peer_id(), Some(1));
    }

    #[test]
    fn four_badges_each_learn_three_others() {
        let (mut badges, plugs) = build_badges(4);
        plug_all(&plugs);
        run_ticks(&mut badges, 0, 600);
        for (i, badge) in badges.iter().enumerate() {
            assert_eq!(badge.state(), NetworkAppState::Idle, "badge {}", i);
            assert_eq!(badge.peer_count(), 4, "badge {}", i);
            assert_eq!(badge.new_badges_discovered(), 3, "badge {}", i);
            assert_eq!(badge.known_badges(), 3, "badge {}", i);
        }
    }

    #[test]
    fn animation_plays_after_the_round() {
        let (mut badges, plugs) = build_badges(2);
        plug_all(&plugs);
        let mut t = 0;
        // Tick until the exchange completes, then observe the animation.
        while badges[0].state() != NetworkAppState::AnimatePairing {
            t = run_ticks(&mut badges, t, 1);
            assert!(t < 500, "exchange never completed");
        }
        assert_ne!(badges[0].animation_phase(), AnimationPhase::Done);
        run_ticks(&mut badges, t, 200);
        assert_eq!(badges[0].state(), NetworkAppState::Idle);
        assert_eq!(badges[0].animation_phase(), AnimationPhase::Done);
    }

    #[test]
    fn reconnecting_the_same_badge_is_not_new() {
        let (mut badges, plugs) = build_badges(2);
        plug_all(&plugs);
        let t = run_ticks(&mut badges, 0, 200);
        assert_eq!(badges[0].new_badges_discovered(), 1);

        plugs[0].set(false);
        let t = run_ticks(&mut badges, t, 60);
        assert_eq!(badges[0].state(), NetworkAppState::Unconnected);
        assert_eq!(badges[0].peer_id(), None);

        plugs[0].set(true);
        run_ticks(&mut badges, t, 200);
        for badge in &badges {
            assert_eq!(badge.state(), NetworkAppState::Idle);
            // The round ran again but met nobody new.
            assert_eq!(badge.new_badges_discovered(), 0);
            assert_eq!(badge.known_badges(), 1);
        }
    }

    #[test]
    fn disconnection_mid_exchange_abandons_the_round() {
        let (mut badges, plugs) = build_badges(3);
        plug_all(&plugs);
        let mut t = 0;
        // Stop as soon as the chain is exchanging, before it finishes.
        while badges[1].peer_count() != 3 {
            t = run_ticks(&mut badges, t, 1);
            assert!(t < 500, "discovery never completed");
        }
        plugs[0].set(false);
        plugs[1].set(false);
        run_ticks(&mut badges, t, 60);
        for (i, badge) in badges.iter().enumerate() {
            assert_eq!(badge.state(), NetworkAppState::Unconnected, "badge {}", i);
            assert_eq!(badge.peer_id(), None, "badge {}", i);
        }
    }

    #[test]
    fn chains_of_many_sizes_complete_the_round() {
        for &n in &[3usize, 5, 8] {
            let (mut badges, plugs) = build_badges(n);
            plug_all(&plugs);
            run_ticks(&mut badges, 0, 1500);
            for (i, badge) in badges.iter().enumerate() {
                assert_eq!(badge.state(), NetworkAppState::Idle, "n={} badge {}", n, i);
                assert_eq!(
                    badge.new_badges_discovered(),
                    n as u8 - 1,
                    "n={} badge {}",
                    n,
                    i
                );
            }
        }
    }

    #[test]
    fn animator_phase_order() {
        let mut animator = PairingAnimator::new();
        assert!(animator.is_done());
        animator.start();
        let mut phases = vec![animator.phase()];
        for _ in 0..200 {
            animator.tick();
            if phases.last() != Some(&animator.phase()) {
                phases.push(animator.phase());
            }
        }
        assert_eq!(
            phases,
            vec![
                AnimationPhase::WaitMessagePart1,
                AnimationPhase::LightUpUpperBar,
                AnimationPhase::LightUpLowerBar,
                AnimationPhase::WaitMessagePart2,
                AnimationPhase::WaitDone,
                AnimationPhase::Done,
            ]
        );
    }
}
