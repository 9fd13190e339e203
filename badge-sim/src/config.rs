//! Simulator configuration: file, then environment overrides.

use serde::Deserialize;
use std::path::PathBuf;

/// Simulation parameters. File: ./badge-sim.toml or
/// ~/.config/badge-sim/config.toml.
/// Env overrides: BADGE_SIM_BADGES, BADGE_SIM_TICKS, BADGE_SIM_TICK_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Number of badges in the chain.
    #[serde(default = "default_badges")]
    pub badges: usize,
    /// Ticks to run before reporting.
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Simulated milliseconds per tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Ticks between plugging consecutive cables; 0 plugs them all at
    /// once.
    #[serde(default)]
    pub stagger_ticks: u64,
    /// Protocol tunables passed through to every badge.
    #[serde(default)]
    pub protocol: badge_core::Config,
}

fn default_badges() -> usize {
    3
}
fn default_ticks() -> u64 {
    2000
}
fn default_tick_ms() -> u64 {
    10
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            badges: default_badges(),
            ticks: default_ticks(),
            tick_ms: default_tick_ms(),
            stagger_ticks: 0,
            protocol: badge_core::Config::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> SimConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("BADGE_SIM_BADGES") {
        if let Ok(n) = s.parse::<usize>() {
            c.badges = n;
        }
    }
    if let Ok(s) = std::env::var("BADGE_SIM_TICKS") {
        if let Ok(n) = s.parse::<u64>() {
            c.ticks = n;
        }
    }
    if let Ok(s) = std::env::var("BADGE_SIM_TICK_MS") {
        if let Ok(n) = s.parse::<u64>() {
            c.tick_ms = n;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from("badge-sim.toml")];
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/badge-sim/config.toml"));
    }
    out
}

fn load_file() -> Option<SimConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<SimConfig>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
