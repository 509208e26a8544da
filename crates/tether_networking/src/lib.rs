//! # TETHER Networking - Robot ↔ Console State Replication
//!
//! Keeps entity/component state converged between a robot controller and
//! operator consoles over ordered, reliable TCP links.
//!
//! ## Architecture
//!
//! - **Protocol**: length-framed binary ops (`Spawn`, `Update`, `Remove`,
//!   `Despawn`, snapshot brackets, `Ack`, `Heartbeat`)
//! - **Transport**: non-blocking reactor thread; the tick thread only
//!   enqueues and polls
//! - **Replication**: per-peer change tracking, coalescing, resync on
//!   connect and after loss
//! - **Schedule**: fixed-rate ticks with `PreUpdate`, `Update` and
//!   `PostUpdate` phases
//!
//! ## Tick
//!
//! ```text
//!   inbound frames ──> PreUpdate ──> Update ──> PostUpdate ──> outbound frames
//!      (apply)                     (systems)                 (track + encode)
//! ```
//!
//! Nothing in the replication path is fatal: bad input is logged and
//! skipped, lost links are resynced.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_networking::{Replicator, SyncApp, SyncConfig, TcpTransport};
//!
//! let config = SyncConfig::load("robot.toml")?;
//! let transport = TcpTransport::start(config.transport_config(), instance)?;
//! let replicator = Replicator::new(transport, registry, config.replication_config());
//! let mut app = SyncApp::new(store, replicator, config.tick_rate);
//! app.run_until(&stop);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod replication;
pub mod schedule;
pub mod transport;

pub use config::SyncConfig;
pub use error::{
    ConfigError, ConfigResult, SyncError, SyncResult, TransportError, TransportResult, WireError,
    WireResult,
};
pub use replication::{
    PeerEvent, PeerInfo, PeerLink, PeerState, ReplicationConfig, Replicator,
};
pub use schedule::{Phase, Schedule, SyncApp, TickLoop, TickStats};
pub use transport::{
    MemoryLink, MemoryTransport, SendOutcome, TcpTransport, Transport, TransportConfig,
    TransportEvent, TransportStats,
};

/// `Hello` magic: the bytes `TTHR` read as a little-endian u32.
pub const PROTOCOL_MAGIC: u32 = u32::from_le_bytes(*b"TTHR");

/// Incompatible wire changes bump this; peers must match exactly.
pub const PROTOCOL_VERSION_MAJOR: u16 = 1;

/// Compatible wire additions bump this; mismatches are accepted.
pub const PROTOCOL_VERSION_MINOR: u16 = 0;

/// Default control-loop rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Smallest accepted `max_frame_bytes`.
///
/// Room for any fixed-size op plus a small component payload.
pub const MIN_FRAME_BYTES: usize = 64;

/// Default frame body budget.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024;
