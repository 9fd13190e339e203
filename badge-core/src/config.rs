//! Protocol configuration. Loaded by the host before `setup()`.

use serde::Deserialize;

use crate::message::MAX_PAYLOAD;

/// Tunable protocol parameters. All fields have defaults suitable for a
/// badge ticked every ~10 ms; hosts may override them from a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Largest application payload accepted by `enqueue_message`.
    /// Capped at the wire limit of 31 bytes (5-bit length field).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u8,
    /// Ticks a left-most node waits before originating discovery, so
    /// every neighbor has entered listening mode first.
    #[serde(default = "default_announce_wait_ticks")]
    pub announce_wait_ticks: u8,
    /// Interval between keepalive messages while RUNNING.
    #[serde(default = "default_monitor_period_ms")]
    pub monitor_period_ms: u64,
    /// Silence on both links longer than this is treated as a dead
    /// link and forces rediscovery.
    #[serde(default = "default_monitor_timeout_ms")]
    pub monitor_timeout_ms: u64,
}

fn default_max_message_size() -> u8 {
    MAX_PAYLOAD as u8
}
fn default_announce_wait_ticks() -> u8 {
    3
}
fn default_monitor_period_ms() -> u64 {
    250
}
fn default_monitor_timeout_ms() -> u64 {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            announce_wait_ticks: default_announce_wait_ticks(),
            monitor_period_ms: default_monitor_period_ms(),
            monitor_timeout_ms: default_monitor_timeout_ms(),
        }
    }
}

impl Config {
    /// Effective payload cap: configured value clamped to the wire limit.
    pub fn payload_cap(&self) -> u8 {
        self.max_message_size.min(MAX_PAYLOAD as u8)
    }
}
