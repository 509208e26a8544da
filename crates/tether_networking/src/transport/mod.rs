//! # Transport Layer
//!
//! One ordered, reliable byte stream per peer, carrying length-framed
//! batches.
//!
//! ## Design
//!
//! - The tick thread only ever enqueues and polls; it never waits on I/O
//! - Inbound events arrive through a bounded queue, in stream order
//! - Outbound frames wait in a bounded per-peer queue as whole batches;
//!   when it is full the oldest batches are dropped and the caller is told so
//! - A lost connection discards its queued frames; recovery is a resync

mod backoff;
mod memory;
mod queue;
mod tcp;

use std::net::SocketAddr;
use std::time::Duration;

use tether_core::{InstanceId, PeerToken};

pub use backoff::Backoff;
pub use memory::{MemoryLink, MemoryTransport};
pub use queue::{BatchQueue, OutboundQueue, PushOutcome};
pub use tcp::TcpTransport;

use crate::error::TransportResult;
use crate::DEFAULT_MAX_FRAME_BYTES;

/// Something that happened on the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; frames may flow.
    Connected {
        /// Connection handle.
        peer: PeerToken,
        /// Remote address, if the link has one.
        addr: Option<SocketAddr>,
        /// Remote instance id from its `Hello`.
        remote: InstanceId,
    },
    /// A complete frame body arrived.
    Frame {
        /// Sending peer.
        peer: PeerToken,
        /// Frame body (ops, without the length header).
        body: Vec<u8>,
    },
    /// The connection is gone. Queued outbound frames were discarded.
    Disconnected {
        /// Connection handle.
        peer: PeerToken,
        /// Human-readable cause.
        reason: String,
    },
    /// Handshake refused. The connection is not retried.
    Rejected {
        /// Connection handle.
        peer: PeerToken,
        /// Remote address, if the link has one.
        addr: Option<SocketAddr>,
        /// Human-readable cause.
        reason: String,
    },
}

/// Result of handing a batch to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Batch queued.
    Queued,
    /// Batch queued, but older queued batches were dropped to make room.
    DroppedOldest,
    /// No live connection with that token; batch discarded.
    NoSuchPeer,
}

/// Transport statistics, counted on the tick-thread side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames accepted for sending.
    pub frames_sent: u64,
    /// Bytes accepted for sending.
    pub bytes_sent: u64,
    /// Frames delivered by `poll_event`.
    pub frames_received: u64,
    /// Bytes delivered by `poll_event`.
    pub bytes_received: u64,
    /// Frames lost to a full outbound queue.
    pub frames_dropped: u64,
}

impl TransportStats {
    pub(crate) fn record_send(&mut self, frames: usize, bytes: usize, dropped: usize) {
        self.frames_sent += frames as u64;
        self.bytes_sent += bytes as u64;
        self.frames_dropped += dropped as u64;
    }

    pub(crate) fn record_event(&mut self, event: &TransportEvent) {
        if let TransportEvent::Frame { body, .. } = event {
            self.frames_received += 1;
            self.bytes_received += body.len() as u64;
        }
    }
}

/// A set of framed peer connections driven from the tick thread.
pub trait Transport: Send {
    /// Returns the next pending event without blocking.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Enqueues complete frames (headers included) for `peer` as one batch.
    /// The batch is delivered whole or dropped whole.
    fn send_batch(&mut self, peer: PeerToken, batch: Vec<Vec<u8>>) -> SendOutcome;

    /// Enqueues a single frame as its own batch.
    fn send(&mut self, peer: PeerToken, frame: Vec<u8>) -> SendOutcome {
        self.send_batch(peer, vec![frame])
    }

    /// Starts dialing `addr`, reconnecting with backoff until disconnected.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot dial.
    fn connect(&mut self, addr: SocketAddr) -> TransportResult<PeerToken>;

    /// Drops a connection and cancels any reconnection for it.
    fn disconnect(&mut self, peer: PeerToken);

    /// This side's instance id, announced in `Hello`.
    fn local_instance(&self) -> InstanceId;

    /// Counters since creation.
    fn stats(&self) -> TransportStats;
}

/// Transport tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Accept connections here (listener role).
    pub listen_addr: Option<SocketAddr>,
    /// Dial these at startup (dialer role).
    pub peers: Vec<SocketAddr>,
    /// Idle time before a heartbeat is written.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is considered dead.
    pub dead_peer_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_initial: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
    /// Largest frame body accepted or produced.
    pub max_frame_bytes: usize,
    /// Outbound frames queued per peer before the oldest batch is dropped.
    pub outbound_queue_frames: usize,
    /// Inbound events buffered for the tick thread.
    pub inbound_queue_frames: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            peers: Vec::new(),
            heartbeat_interval: Duration::from_millis(500),
            dead_peer_timeout: Duration::from_secs(3),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue_frames: 256,
            inbound_queue_frames: 1024,
        }
    }
}
