//! rbmon-core — host monitoring agent library.
//!
//! Provides:
//! - `classifier` — environment classification cascade (bare metal, VM, container, cloud)
//! - `collector` — host access seams (filesystem, commands) and test mocks
//! - `metrics` — CPU, memory, disk, network and uptime readings
//! - `resolver` — public address lookup
//! - `probe` — TCP reachability probes
//! - `report` — report assembly
//! - `transport` — collector connection (Socket.IO)
//! - `session` — connection lifecycle state machine and scheduling loop
//! - `config` — agent configuration
//! - `fmt` — byte and rate formatting

pub mod classifier;
pub mod collector;
pub mod config;
pub mod fmt;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod session;
pub mod transport;

/// Protocol version announced in heartbeats.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
