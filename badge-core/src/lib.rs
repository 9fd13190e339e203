//! Daisy-chain networking core for a conference badge.
//!
//! Badges connect left-to-right over point-to-point serial links and form
//! a linear chain. The core is host-driven and allocation-free: the host
//! owns the links, supplies the clock, and calls [`Badge::tick`] (or
//! [`NetworkHandler::run`] directly) at a steady rate; everything else is
//! a synchronous state machine.
//!
//! Layers, bottom up:
//! - [`link`]: the [`Link`] trait the host implements per serial port.
//! - [`frame`]: byte framing with magic-byte resynchronization.
//! - [`handler`]: discovery, identity assignment, relaying, keepalives.
//! - [`exchanger`] and [`badge`]: the identity-exchange application and
//!   the badge-level connection state machine on top of it.

pub mod badge;
pub mod config;
pub mod exchanger;
pub mod frame;
pub mod handler;
pub mod link;
pub mod loopback;
pub mod message;

pub use badge::{AnimationPhase, Badge, NetworkAppState};
pub use config::Config;
pub use exchanger::BadgeDiscovered;
pub use handler::{
    AbsoluteTimeMs, EnqueueResult, MessageAction, NetworkHandler, NetworkNotifier, PeerId,
    WireState,
};
pub use link::{Direction, Link, LinkPosition};
pub use message::{BadgeUid, WireError, MAX_PAYLOAD, MAX_PEERS};
