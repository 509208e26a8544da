//! # In-Memory Transport
//!
//! A deterministic two-ended link living inside one process. Both ends
//! implement [`Transport`], so replication can be exercised end to end
//! without sockets or timing.
//!
//! ## Conditions
//!
//! - `sever` drops the link and everything in flight
//! - `reconnect` brings it back, announcing `Connected` on both ends
//! - `set_stalled` stops delivery; batches pile up and the oldest are
//!   dropped once `capacity` frames are exceeded

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::{InstanceId, PeerToken};

use super::queue::BatchQueue;
use super::{SendOutcome, Transport, TransportEvent, TransportStats};
use crate::error::{TransportError, TransportResult};
use crate::protocol::FrameAssembler;
use crate::DEFAULT_MAX_FRAME_BYTES;

/// Token both ends use for each other.
const LINK_TOKEN: PeerToken = PeerToken(1);

struct LinkState {
    up: bool,
    stalled: bool,
    instances: [InstanceId; 2],
    /// Batches in flight toward each end.
    in_flight: [BatchQueue; 2],
    /// Control events pending for each end.
    events: [VecDeque<TransportEvent>; 2],
    assemblers: [FrameAssembler; 2],
}

impl LinkState {
    fn announce_connected(&mut self) {
        for side in 0..2 {
            self.events[side].push_back(TransportEvent::Connected {
                peer: LINK_TOKEN,
                addr: None,
                remote: self.instances[1 - side],
            });
        }
    }

    fn drop_link(&mut self, reason: &str) {
        if !self.up {
            return;
        }
        self.up = false;
        for side in 0..2 {
            self.in_flight[side].clear();
            self.assemblers[side].reset();
            self.events[side].push_back(TransportEvent::Disconnected {
                peer: LINK_TOKEN,
                reason: reason.to_owned(),
            });
        }
    }
}

/// Handle for driving link conditions from a test.
#[derive(Clone)]
pub struct MemoryLink {
    state: Arc<Mutex<LinkState>>,
}

impl MemoryLink {
    /// Drops the connection on both ends.
    pub fn sever(&self) {
        self.state.lock().drop_link("link severed");
    }

    /// Re-establishes a severed connection.
    pub fn reconnect(&self) {
        let mut state = self.state.lock();
        if state.up {
            return;
        }
        state.up = true;
        state.announce_connected();
    }

    /// Holds (`true`) or releases (`false`) delivery in both directions.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Returns true while connected.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.state.lock().up
    }

    /// Frames waiting for delivery toward each end.
    #[must_use]
    pub fn in_flight(&self) -> [usize; 2] {
        let state = self.state.lock();
        [state.in_flight[0].len(), state.in_flight[1].len()]
    }
}

/// One end of an in-memory link.
pub struct MemoryTransport {
    side: usize,
    link: MemoryLink,
    stats: TransportStats,
}

impl MemoryTransport {
    /// Creates two connected ends. Each end sees the other as `PeerToken(1)`
    /// and finds a `Connected` event waiting.
    #[must_use]
    pub fn pair(a: InstanceId, b: InstanceId, capacity: usize) -> (Self, Self) {
        let mut state = LinkState {
            up: true,
            stalled: false,
            instances: [a, b],
            in_flight: [BatchQueue::new(capacity), BatchQueue::new(capacity)],
            events: [VecDeque::new(), VecDeque::new()],
            assemblers: [
                FrameAssembler::new(DEFAULT_MAX_FRAME_BYTES * 4),
                FrameAssembler::new(DEFAULT_MAX_FRAME_BYTES * 4),
            ],
        };
        state.announce_connected();
        let link = MemoryLink {
            state: Arc::new(Mutex::new(state)),
        };
        (
            Self {
                side: 0,
                link: link.clone(),
                stats: TransportStats::default(),
            },
            Self {
                side: 1,
                link,
                stats: TransportStats::default(),
            },
        )
    }

    /// Handle for severing, reconnecting or stalling the link.
    #[must_use]
    pub fn link(&self) -> MemoryLink {
        self.link.clone()
    }

    /// The token under which the other end appears.
    #[must_use]
    pub const fn peer_token(&self) -> PeerToken {
        LINK_TOKEN
    }
}

impl Transport for MemoryTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = {
            let mut state = self.link.state.lock();
            let side = self.side;
            if let Some(event) = state.events[side].pop_front() {
                Some(event)
            } else if state.stalled || !state.up {
                None
            } else {
                let mut delivered = None;
                while let Some(bytes) = state.in_flight[side].pop() {
                    state.assemblers[side].push(&bytes);
                    match state.assemblers[side].next_frame() {
                        Ok(Some(body)) => {
                            delivered = Some(TransportEvent::Frame {
                                peer: LINK_TOKEN,
                                body,
                            });
                            break;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "memory link protocol violation");
                            state.drop_link(&err.to_string());
                            delivered = state.events[side].pop_front();
                            break;
                        }
                    }
                }
                delivered
            }
        };
        if let Some(event) = &event {
            self.stats.record_event(event);
        }
        event
    }

    fn send_batch(&mut self, peer: PeerToken, batch: Vec<Vec<u8>>) -> SendOutcome {
        let mut state = self.link.state.lock();
        if peer != LINK_TOKEN || !state.up {
            return SendOutcome::NoSuchPeer;
        }
        let frames = batch.len();
        let bytes: usize = batch.iter().map(Vec::len).sum();
        let dropped = state.in_flight[1 - self.side].push(batch);
        drop(state);

        self.stats.record_send(frames, bytes, dropped);
        if dropped == 0 {
            SendOutcome::Queued
        } else {
            SendOutcome::DroppedOldest
        }
    }

    fn connect(&mut self, _addr: SocketAddr) -> TransportResult<PeerToken> {
        Err(TransportError::Unsupported("memory links are created in pairs"))
    }

    fn disconnect(&mut self, peer: PeerToken) {
        if peer == LINK_TOKEN {
            self.link.state.lock().drop_link("disconnected by operator");
        }
    }

    fn local_instance(&self) -> InstanceId {
        self.link.state.lock().instances[self.side]
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}
