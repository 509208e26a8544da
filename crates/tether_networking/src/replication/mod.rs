//! # Replication
//!
//! Per-peer state replication on top of a [`Transport`](crate::transport::Transport).
//!
//! ## Tick flow
//!
//! ```text
//! PreUpdate:  transport events -> applier -> Store (mirrors)
//! Update:     user systems mutate the Store
//! PostUpdate: ChangeSet -> tracker (per peer) -> PendingBatch -> encoder -> frames
//! ```
//!
//! Every peer has its own [`PeerLink`]: what it has been told, what it has
//! told us, and the mapping from its entity ids to our mirrors.

mod applier;
mod encoder;
mod mapping;
mod peer;
mod replicator;
mod tracker;

use std::net::SocketAddr;

use tether_core::{InstanceId, PeerToken};

use crate::DEFAULT_MAX_FRAME_BYTES;

pub use applier::{apply_frame, ApplyReport};
pub use encoder::encode_batch;
pub use mapping::EntityMap;
pub use peer::{PeerLink, PendingBatch};
pub use replicator::Replicator;
pub use tracker::track;

/// Replication settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Largest frame body the encoder produces.
    pub max_frame_bytes: usize,
    /// Ticks between outbound flushes. Snapshots flush immediately.
    pub flush_interval_ticks: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            flush_interval_ticks: 1,
        }
    }
}

/// Lifecycle of one peer link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Dialing, or connected and waiting for the peer's snapshot.
    #[default]
    Connecting,
    /// The peer's full snapshot has been applied.
    Synced,
    /// Link lost; mirrors destroyed.
    Disconnected,
}

/// Snapshot of one peer for operators and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    /// Link handle.
    pub token: PeerToken,
    /// Remote address, when the transport has one.
    pub addr: Option<SocketAddr>,
    /// Remote instance, once the handshake completed.
    pub remote_instance: Option<InstanceId>,
    /// Current state.
    pub state: PeerState,
    /// Ticks between our send and the peer's acknowledgement.
    pub latency_ticks: Option<u64>,
    /// Live mirrors of the peer's entities.
    pub mirrored_entities: usize,
}

/// Link notifications surfaced to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// Handshake done; snapshots are being exchanged.
    Connected {
        /// Link handle.
        peer: PeerToken,
        /// Remote instance.
        remote: InstanceId,
    },
    /// The peer's snapshot has been applied.
    Synced {
        /// Link handle.
        peer: PeerToken,
    },
    /// Link lost. Mirrors of the peer are gone.
    Disconnected {
        /// Link handle.
        peer: PeerToken,
        /// Why.
        reason: String,
    },
    /// Handshake refused. Not retried.
    Rejected {
        /// Link handle.
        peer: PeerToken,
        /// Why.
        reason: String,
    },
}
