//! # Peer Link State
//!
//! Everything the replicator remembers about one peer connection.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting --(peer's SnapshotEnd applied)--> Synced
//!     ^                                          |
//!     +------------- reconnect <-- Disconnected <+
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;

use tether_core::{
    ComponentTypeId, EntityId, EntityOrigin, InstanceId, NetId, PeerToken, Tick,
};

use super::mapping::EntityMap;
use super::{PeerInfo, PeerState};
use crate::protocol::ComponentPayload;

/// Changes waiting for the next flush to one peer, coalesced by key.
///
/// Only keys are kept; values are read from the store at flush time, so a
/// key written many times between flushes is sent once with its latest
/// value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingBatch {
    /// Send a bracketed full snapshot taken at this tick.
    pub snapshot: Option<Tick>,
    /// Entities the peer must learn about, with every component.
    pub spawns: BTreeMap<NetId, EntityId>,
    /// Single component values, with the tick they were queued at.
    pub updates: BTreeMap<(NetId, ComponentTypeId), (EntityId, Tick)>,
    /// Component removals.
    pub removals: BTreeMap<(NetId, ComponentTypeId), Tick>,
    /// Entity despawns.
    pub despawns: BTreeMap<NetId, Tick>,
}

impl PendingBatch {
    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
            && self.spawns.is_empty()
            && self.updates.is_empty()
            && self.removals.is_empty()
            && self.despawns.is_empty()
    }

    /// Number of queued ops, not counting snapshot brackets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spawns.len() + self.updates.len() + self.removals.len() + self.despawns.len()
    }

    /// Queues a spawn. Supersedes a pending despawn of the same id.
    pub fn queue_spawn(&mut self, net_id: NetId, entity: EntityId) {
        self.despawns.remove(&net_id);
        self.spawns.insert(net_id, entity);
    }

    /// Queues a component value. Dropped if the entity's spawn is still
    /// pending, since the spawn will carry it.
    pub fn queue_update(
        &mut self,
        net_id: NetId,
        type_id: ComponentTypeId,
        entity: EntityId,
        tick: Tick,
    ) {
        if self.spawns.contains_key(&net_id) {
            return;
        }
        self.removals.remove(&(net_id, type_id));
        self.updates.insert((net_id, type_id), (entity, tick));
    }

    /// Queues a component removal, cancelling a pending value for the key.
    pub fn queue_removal(&mut self, net_id: NetId, type_id: ComponentTypeId, tick: Tick) {
        if self.spawns.contains_key(&net_id) {
            return;
        }
        self.updates.remove(&(net_id, type_id));
        self.removals.insert((net_id, type_id), tick);
    }

    /// Queues a despawn. A still-pending spawn is cancelled instead and
    /// nothing is sent. Returns true if a despawn was queued.
    pub fn queue_despawn(&mut self, net_id: NetId, tick: Tick) -> bool {
        self.forget_entity(net_id);
        if self.spawns.remove(&net_id).is_some() {
            return false;
        }
        self.despawns.insert(net_id, tick);
        true
    }

    fn forget_entity(&mut self, net_id: NetId) {
        self.updates.retain(|(id, _), _| *id != net_id);
        self.removals.retain(|(id, _), _| *id != net_id);
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// One entity of a snapshot being received.
#[derive(Clone, Debug, Default)]
pub(crate) struct StagedEntity {
    pub tick: Tick,
    pub components: BTreeMap<ComponentTypeId, Vec<u8>>,
}

/// A snapshot stream between `SnapshotBegin` and `SnapshotEnd`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Staging {
    pub tick: Tick,
    pub entities: BTreeMap<NetId, StagedEntity>,
}

impl StagedEntity {
    pub fn from_payloads(tick: Tick, payloads: Vec<ComponentPayload>) -> Self {
        Self {
            tick,
            components: payloads
                .into_iter()
                .map(|payload| (payload.type_id, payload.bytes))
                .collect(),
        }
    }
}

/// Replication state for one peer.
#[derive(Debug)]
pub struct PeerLink {
    /// Link handle.
    pub token: PeerToken,
    /// Remote address, if the transport has one.
    pub addr: Option<SocketAddr>,
    /// Remote instance, set by the handshake.
    pub remote_instance: Option<InstanceId>,
    /// Current state.
    pub state: PeerState,
    /// Remote id ↔ local mirror.
    pub mirrors: EntityMap,
    /// Ticks between our send and the peer acknowledging it.
    pub latency_ticks: Option<u64>,
    /// Created by an explicit dial; kept while the transport redials.
    pub(crate) dialed: bool,
    /// Set by an operator disconnect; the link is forgotten once it drops.
    pub(crate) closing: bool,
    /// Newest remote tick applied per (entity, component).
    pub(crate) last_applied: HashMap<(EntityId, ComponentTypeId), Tick>,
    /// Newest remote tick seen in any op.
    pub(crate) newest_remote_tick: Option<Tick>,
    /// An ack is owed with the next flush.
    pub(crate) ack_due: bool,
    /// Our entities the peer has been told about.
    pub(crate) known: HashSet<NetId>,
    /// Tick of the last change scan for this peer.
    pub(crate) last_scanned: Tick,
    /// Changes waiting for the next flush.
    pub(crate) pending: PendingBatch,
    /// Send a full snapshot on the next scan.
    pub(crate) needs_snapshot: bool,
    /// Snapshot being received.
    pub(crate) staging: Option<Staging>,
    /// Ticks since the last flush.
    pub(crate) ticks_since_flush: u32,
}

impl PeerLink {
    /// Creates a link that has not completed its handshake.
    #[must_use]
    pub fn new(token: PeerToken, addr: Option<SocketAddr>) -> Self {
        Self {
            token,
            addr,
            remote_instance: None,
            state: PeerState::Connecting,
            mirrors: EntityMap::new(),
            latency_ticks: None,
            dialed: false,
            closing: false,
            last_applied: HashMap::new(),
            newest_remote_tick: None,
            ack_due: false,
            known: HashSet::new(),
            last_scanned: Tick::ZERO,
            pending: PendingBatch::default(),
            needs_snapshot: false,
            staging: None,
            ticks_since_flush: 0,
        }
    }

    /// Handshake completed: start over and schedule our snapshot.
    pub fn on_connected(&mut self, remote: InstanceId, addr: Option<SocketAddr>) {
        self.reset_stream();
        if addr.is_some() {
            self.addr = addr;
        }
        self.remote_instance = Some(remote);
        self.state = PeerState::Connecting;
        self.needs_snapshot = true;
    }

    /// Link lost. Mirrors must already have been despawned.
    pub fn on_disconnected(&mut self) {
        self.reset_stream();
        self.mirrors.drain();
        self.state = PeerState::Disconnected;
    }

    fn reset_stream(&mut self) {
        self.last_applied.clear();
        self.newest_remote_tick = None;
        self.ack_due = false;
        self.known.clear();
        self.last_scanned = Tick::ZERO;
        self.pending.clear();
        self.needs_snapshot = false;
        self.staging = None;
        self.ticks_since_flush = 0;
        self.latency_ticks = None;
    }

    /// Returns true once the handshake completed and until the link drops.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.remote_instance.is_some() && self.state != PeerState::Disconnected
    }

    /// True if the peer is the authority for this entity: it is our mirror
    /// of the peer's entity, or the peer created it.
    ///
    /// Such entities are never spawned or despawned toward the peer; local
    /// edits travel as updates only.
    #[must_use]
    pub fn owns(&self, origin: EntityOrigin, net_id: NetId) -> bool {
        origin == EntityOrigin::Mirror(self.token) || Some(net_id.origin) == self.remote_instance
    }

    /// Forgets a mirror that local logic despawned.
    pub fn forget_mirror(&mut self, local: EntityId) {
        if self.mirrors.remove_local(local).is_some() {
            self.forget_applied(local);
        }
    }

    pub(crate) fn forget_applied(&mut self, local: EntityId) {
        self.last_applied.retain(|(entity, _), _| *entity != local);
    }

    /// Records a remote tick from an applied op.
    pub(crate) fn observe_remote_tick(&mut self, tick: Tick) {
        if self.newest_remote_tick.map_or(true, |newest| tick > newest) {
            self.newest_remote_tick = Some(tick);
        }
        self.ack_due = true;
    }

    /// Operator-facing summary.
    #[must_use]
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            token: self.token,
            addr: self.addr,
            remote_instance: self.remote_instance,
            state: self.state,
            latency_ticks: self.latency_ticks,
            mirrored_entities: self.mirrors.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(serial: u64) -> NetId {
        NetId::new(InstanceId(1), serial)
    }

    #[test]
    fn test_update_for_pending_spawn_is_dropped() {
        let mut batch = PendingBatch::default();
        let entity = EntityId::new(0, 0);
        batch.queue_spawn(net(1), entity);
        batch.queue_update(net(1), ComponentTypeId(2), entity, Tick(3));

        assert_eq!(batch.spawns.len(), 1);
        assert!(batch.updates.is_empty());
    }

    #[test]
    fn test_updates_coalesce_by_key() {
        let mut batch = PendingBatch::default();
        let entity = EntityId::new(0, 0);
        batch.queue_update(net(1), ComponentTypeId(2), entity, Tick(3));
        batch.queue_update(net(1), ComponentTypeId(2), entity, Tick(4));

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.updates[&(net(1), ComponentTypeId(2))].1, Tick(4));
    }

    #[test]
    fn test_removal_and_update_cancel_each_other() {
        let mut batch = PendingBatch::default();
        let entity = EntityId::new(0, 0);
        let key = (net(1), ComponentTypeId(2));

        batch.queue_update(key.0, key.1, entity, Tick(3));
        batch.queue_removal(key.0, key.1, Tick(4));
        assert!(batch.updates.is_empty());
        assert_eq!(batch.removals.len(), 1);

        batch.queue_update(key.0, key.1, entity, Tick(5));
        assert!(batch.removals.is_empty());
        assert_eq!(batch.updates.len(), 1);
    }

    #[test]
    fn test_despawn_cancels_pending_spawn() {
        let mut batch = PendingBatch::default();
        batch.queue_spawn(net(1), EntityId::new(0, 0));

        assert!(!batch.queue_despawn(net(1), Tick(2)));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_despawn_drops_queued_changes() {
        let mut batch = PendingBatch::default();
        let entity = EntityId::new(0, 0);
        batch.queue_update(net(1), ComponentTypeId(2), entity, Tick(3));
        batch.queue_removal(net(1), ComponentTypeId(4), Tick(3));
        batch.queue_update(net(2), ComponentTypeId(2), EntityId::new(1, 0), Tick(3));

        assert!(batch.queue_despawn(net(1), Tick(4)));
        assert_eq!(batch.updates.len(), 1);
        assert!(batch.removals.is_empty());
        assert_eq!(batch.despawns[&net(1)], Tick(4));
    }

    #[test]
    fn test_link_ownership() {
        let mut link = PeerLink::new(PeerToken(3), None);
        link.on_connected(InstanceId(42), None);

        assert!(link.is_live());
        assert!(link.needs_snapshot);
        assert!(link.owns(EntityOrigin::Mirror(PeerToken(3)), net(9)));
        assert!(link.owns(EntityOrigin::Local, NetId::new(InstanceId(42), 1)));
        assert!(!link.owns(EntityOrigin::Local, net(9)));
        assert!(!link.owns(EntityOrigin::Mirror(PeerToken(4)), net(9)));

        link.on_disconnected();
        assert!(!link.is_live());
        assert_eq!(link.info().state, PeerState::Disconnected);
    }
}
