//! # Replicator
//!
//! Owns the transport and every [`PeerLink`], and runs the two replication
//! phases of a tick.
//!
//! ## Phases
//!
//! - [`Replicator::pre_update`] drains transport events: handshakes reset
//!   links and schedule snapshots, frames are applied, lost links take
//!   their mirrors with them
//! - [`Replicator::post_update`] takes the tick's changes, tracks them per
//!   peer and flushes pending batches as frames
//!
//! Each flush goes out as one batch. A full outbound queue drops its oldest
//! batches; the peer is then resynced with a fresh snapshot, since the
//! dropped batches may have held anything.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use tether_core::{ComponentRegistry, EntityId, EntityOrigin, NetId, PeerToken, Store};
use tracing::{debug, info, trace, warn};

use super::applier::apply_frame;
use super::encoder::encode_batch;
use super::peer::PeerLink;
use super::tracker::track;
use super::{PeerEvent, PeerInfo, PeerState, ReplicationConfig};
use crate::error::SyncResult;
use crate::transport::{SendOutcome, Transport, TransportEvent};

/// Replication driver for one node.
pub struct Replicator<T: Transport> {
    transport: T,
    registry: ComponentRegistry,
    config: ReplicationConfig,
    peers: BTreeMap<PeerToken, PeerLink>,
    events: VecDeque<PeerEvent>,
}

impl<T: Transport> Replicator<T> {
    /// Creates a replicator over `transport` replicating `registry`'s types.
    #[must_use]
    pub fn new(transport: T, registry: ComponentRegistry, config: ReplicationConfig) -> Self {
        Self {
            transport,
            registry,
            config: ReplicationConfig {
                flush_interval_ticks: config.flush_interval_ticks.max(1),
                ..config
            },
            peers: BTreeMap::new(),
            events: VecDeque::new(),
        }
    }

    /// The component registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, for driving link conditions.
    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Active settings.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Starts dialing `addr`.
    ///
    /// # Errors
    ///
    /// Whatever the transport returns for the dial.
    pub fn connect(&mut self, addr: SocketAddr) -> SyncResult<PeerToken> {
        let token = self.transport.connect(addr)?;
        let link = self
            .peers
            .entry(token)
            .or_insert_with(|| PeerLink::new(token, Some(addr)));
        link.dialed = true;
        info!(peer = %token, %addr, "connecting");
        Ok(token)
    }

    /// Drops a peer and stops reconnecting to it. Its mirrors go away when
    /// the transport reports the disconnect.
    pub fn disconnect(&mut self, peer: PeerToken) {
        self.transport.disconnect(peer);
        let Some(link) = self.peers.get_mut(&peer) else {
            return;
        };
        if link.is_live() {
            link.closing = true;
        } else {
            self.peers.remove(&peer);
        }
        info!(peer = %peer, "disconnect requested");
    }

    /// Summaries of every known peer, in token order.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().map(PeerLink::info).collect()
    }

    /// State of one peer.
    #[must_use]
    pub fn peer_state(&self, peer: PeerToken) -> Option<PeerState> {
        self.peers.get(&peer).map(|link| link.state)
    }

    /// Our mirror of a peer's entity.
    #[must_use]
    pub fn mirror_of(&self, peer: PeerToken, remote: NetId) -> Option<EntityId> {
        self.peers.get(&peer)?.mirrors.local(remote)
    }

    /// Takes the link notifications raised since the last call.
    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        self.events.drain(..).collect()
    }

    /// Forces a full snapshot to `peer` on the next tick.
    pub fn request_resync(&mut self, peer: PeerToken) {
        if let Some(link) = self.peers.get_mut(&peer).filter(|link| link.is_live()) {
            link.needs_snapshot = true;
        }
    }

    // =========================================================================
    // PreUpdate
    // =========================================================================

    /// Drains every pending transport event into the store.
    pub fn pre_update(&mut self, store: &mut Store) {
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(store, event);
        }
    }

    fn handle_event(&mut self, store: &mut Store, event: TransportEvent) {
        match event {
            TransportEvent::Connected { peer, addr, remote } => {
                let link = self
                    .peers
                    .entry(peer)
                    .or_insert_with(|| PeerLink::new(peer, addr));
                if !link.mirrors.is_empty() {
                    despawn_mirrors(store, link);
                }
                link.on_connected(remote, addr);
                info!(peer = %peer, remote = %remote, addr = ?link.addr, "peer connected");
                self.events.push_back(PeerEvent::Connected { peer, remote });
            }
            TransportEvent::Frame { peer, body } => {
                let Some(link) = self.peers.get_mut(&peer).filter(|link| link.is_live()) else {
                    debug!(peer = %peer, len = body.len(), "frame from unknown peer dropped");
                    return;
                };
                let report = apply_frame(store, &self.registry, link, &body);
                if let Some(acked) = report.acked {
                    link.latency_ticks = Some(store.tick().since(acked));
                }
                if report.snapshot_completed && link.state == PeerState::Connecting {
                    link.state = PeerState::Synced;
                    info!(peer = %peer, mirrors = link.mirrors.len(), "peer synced");
                    self.events.push_back(PeerEvent::Synced { peer });
                }
                trace!(
                    peer = %peer,
                    applied = report.applied,
                    ignored = report.ignored,
                    "frame applied"
                );
            }
            TransportEvent::Disconnected { peer, reason } => {
                let Some(link) = self.peers.get_mut(&peer) else {
                    return;
                };
                let mirrors = despawn_mirrors(store, link);
                link.on_disconnected();
                info!(peer = %peer, %reason, mirrors, "peer disconnected");
                if link.closing || !link.dialed {
                    self.peers.remove(&peer);
                }
                self.events.push_back(PeerEvent::Disconnected { peer, reason });
            }
            TransportEvent::Rejected { peer, addr, reason } => {
                if let Some(mut link) = self.peers.remove(&peer) {
                    despawn_mirrors(store, &mut link);
                }
                warn!(peer = %peer, addr = ?addr, %reason, "peer rejected");
                self.events.push_back(PeerEvent::Rejected { peer, reason });
            }
        }
    }

    // =========================================================================
    // PostUpdate
    // =========================================================================

    /// Tracks this tick's changes for every live peer and flushes batches
    /// that are due.
    pub fn post_update(&mut self, store: &mut Store) {
        let changes = store.take_changes();

        for tombstone in changes.despawns.iter().filter(|t| !store.is_alive(t.entity)) {
            match tombstone.entity_origin {
                EntityOrigin::Mirror(owner) => {
                    if !tombstone.stamp.origin.is_from(owner) {
                        if let Some(link) = self.peers.get_mut(&owner) {
                            link.forget_mirror(tombstone.entity);
                        }
                    }
                }
                // Peers may have edited it; their stale-tick entries go with it.
                EntityOrigin::Local => {
                    for link in self.peers.values_mut() {
                        link.forget_applied(tombstone.entity);
                    }
                }
            }
        }

        let flush_interval = self.config.flush_interval_ticks;
        for link in self.peers.values_mut().filter(|link| link.is_live()) {
            track(store, &self.registry, &changes, link);
            link.ticks_since_flush = link.ticks_since_flush.saturating_add(1);
            if link.pending.snapshot.is_some() || link.ticks_since_flush >= flush_interval {
                flush(
                    store,
                    &self.registry,
                    &mut self.transport,
                    self.config.max_frame_bytes,
                    link,
                );
            }
        }
    }
}

/// Despawns every mirror of `link`'s peer. Returns how many there were.
fn despawn_mirrors(store: &mut Store, link: &mut PeerLink) -> usize {
    let mirrors = link.mirrors.drain();
    for (_, local) in &mirrors {
        store.despawn_from_peer(*local, link.token);
    }
    mirrors.len()
}

fn flush<T: Transport>(
    store: &Store,
    registry: &ComponentRegistry,
    transport: &mut T,
    max_frame_bytes: usize,
    link: &mut PeerLink,
) {
    link.ticks_since_flush = 0;
    let ack = if link.ack_due {
        link.newest_remote_tick
    } else {
        None
    };
    if link.pending.is_empty() && ack.is_none() {
        return;
    }

    let batch = std::mem::take(&mut link.pending);
    let ops = batch.len();
    let frames = encode_batch(
        store,
        registry,
        link.token,
        batch,
        store.tick(),
        ack,
        max_frame_bytes,
    );
    link.ack_due = false;

    let count = frames.len();
    match transport.send_batch(link.token, frames) {
        SendOutcome::Queued => {}
        SendOutcome::DroppedOldest => {
            if !link.needs_snapshot {
                warn!(peer = %link.token, "outbound queue full, oldest batch dropped; resyncing");
            }
            link.needs_snapshot = true;
        }
        SendOutcome::NoSuchPeer => {
            debug!(peer = %link.token, "peer gone during flush");
            return;
        }
    }
    trace!(peer = %link.token, ops, frames = count, "flushed");
}
