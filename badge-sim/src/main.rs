// Badge chain simulator: wires N badges together over in-memory links,
// ticks them to convergence and reports what each one learned.

mod config;

use anyhow::bail;
use tracing::info;

use badge_core::loopback::{LoopbackLink, PlugHandle};
use badge_core::{Badge, BadgeUid, NetworkAppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut cfg = config::load();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("badge-sim {}", VERSION);
                return Ok(());
            }
            "--ticks" => match args.next().map(|s| s.parse::<u64>()) {
                Some(Ok(n)) => cfg.ticks = n,
                _ => bail!("--ticks needs a number"),
            },
            "--stagger" => match args.next().map(|s| s.parse::<u64>()) {
                Some(Ok(n)) => cfg.stagger_ticks = n,
                _ => bail!("--stagger needs a tick count"),
            },
            n => match n.parse::<usize>() {
                Ok(n) => cfg.badges = n,
                Err(_) => bail!("usage: badge-sim [N] [--ticks T] [--stagger S]"),
            },
        }
    }
    if cfg.badges < 2 || cfg.badges > badge_core::MAX_PEERS as usize {
        bail!(
            "badge count must be 2..={}, got {}",
            badge_core::MAX_PEERS,
            cfg.badges
        );
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    info!(badges = cfg.badges, ticks = cfg.ticks, "simulation start");

    let (mut badges, plugs) = build_chain(cfg.badges, &cfg);
    for badge in &mut badges {
        badge.setup();
    }

    let mut plugged = 0usize;
    if cfg.stagger_ticks == 0 {
        for plug in &plugs {
            plug.set(true);
        }
        plugged = plugs.len();
    }

    for t in 0..cfg.ticks {
        if cfg.stagger_ticks > 0 && plugged < plugs.len() && t % cfg.stagger_ticks == 0 {
            info!(cable = plugged, tick = t, "plugging cable");
            plugs[plugged].set(true);
            plugged += 1;
        }
        let now = t * cfg.tick_ms;
        for badge in &mut badges {
            badge.tick(now);
        }
    }

    let mut converged = true;
    for (i, badge) in badges.iter().enumerate() {
        println!(
            "badge {:2}  uid {:02x?}  peer_id {:?}  peers {}  state {:?}  new {}  known {}",
            i,
            badge.uid().as_bytes(),
            badge.peer_id(),
            badge.peer_count(),
            badge.state(),
            badge.new_badges_discovered(),
            badge.known_badges(),
        );
        converged &= badge.state() == NetworkAppState::Idle
            && badge.peer_count() as usize == cfg.badges
            && badge.new_badges_discovered() as usize == cfg.badges - 1;
    }
    if !converged {
        bail!("chain did not converge within {} ticks", cfg.ticks);
    }
    info!("chain converged");
    Ok(())
}

/// A linear chain of badges with random identities. All cables start
/// unplugged.
fn build_chain(n: usize, cfg: &config::SimConfig) -> (Vec<Badge<LoopbackLink>>, Vec<PlugHandle>) {
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
        .map(|(left, right)| {
            Badge::new(left, right, cfg.protocol.clone(), BadgeUid::generate())
        })
        .collect();
    (badges, plugs)
}
