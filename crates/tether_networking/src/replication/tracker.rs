//! # Change Tracker
//!
//! Turns one tick's [`ChangeSet`] into per-peer pending work.
//!
//! ## Rules
//!
//! - Writes applied from a peer are never queued back to that peer
//! - Entities the peer owns are never spawned or despawned toward it
//! - An entity the peer has not been told about is spawned whole
//! - A snapshot replaces the whole pending batch with every replicated
//!   entity the peer does not own

use tether_core::{ChangeSet, ComponentRegistry, EntityRecord, Store, Tick};
use tracing::trace;

use super::peer::PeerLink;

/// Scans changes for one peer and coalesces them into its pending batch.
pub fn track(store: &Store, registry: &ComponentRegistry, changes: &ChangeSet, peer: &mut PeerLink) {
    if peer.needs_snapshot {
        queue_snapshot(store, registry, peer);
        peer.needs_snapshot = false;
        peer.last_scanned = store.tick();
        return;
    }

    for tombstone in &changes.despawns {
        if tombstone.stamp.origin.is_from(peer.token)
            || peer.owns(tombstone.entity_origin, tombstone.net_id)
        {
            continue;
        }
        if peer.known.remove(&tombstone.net_id) {
            peer.pending.queue_despawn(tombstone.net_id, tombstone.stamp.tick);
        }
    }

    for removal in &changes.removals {
        if removal.stamp.origin.is_from(peer.token) || !registry.contains(removal.type_id) {
            continue;
        }
        let owned = store
            .entity(removal.entity)
            .is_some_and(|record| peer.owns(record.origin, record.net_id));
        if owned || peer.known.contains(&removal.net_id) {
            peer.pending
                .queue_removal(removal.net_id, removal.type_id, removal.stamp.tick);
        }
    }

    for &entity in &changes.dirty {
        let Some(record) = store.entity(entity).filter(|record| record.is_replicated()) else {
            continue;
        };
        if !peer.owns(record.origin, record.net_id) && peer.known.insert(record.net_id) {
            trace!(peer = %peer.token, entity = %record.net_id, "queue spawn");
            peer.pending.queue_spawn(record.net_id, entity);
            continue;
        }
        let since = peer.last_scanned;
        queue_changed_components(store, registry, record, peer, since);
    }

    peer.last_scanned = changes.tick;
}

fn queue_changed_components(
    store: &Store,
    registry: &ComponentRegistry,
    record: &EntityRecord,
    peer: &mut PeerLink,
    since: Tick,
) {
    for type_id in registry.replicable_types(store, record.id) {
        let Some(stamp) = store.stamp_of(record.id, type_id) else {
            continue;
        };
        if stamp.is_pending_for(peer.token, since) {
            peer.pending
                .queue_update(record.net_id, type_id, record.id, stamp.tick);
        }
    }
}

/// Replaces the pending batch with a full snapshot.
///
/// Entities the peer owns contribute only the values written here, so
/// edits lost with a dropped batch reach the owner again.
fn queue_snapshot(store: &Store, registry: &ComponentRegistry, peer: &mut PeerLink) {
    peer.pending.clear();
    peer.known.clear();
    peer.pending.snapshot = Some(store.tick());

    for record in store.entities().filter(|record| record.is_replicated()) {
        if peer.owns(record.origin, record.net_id) {
            queue_changed_components(store, registry, record, peer, Tick::ZERO);
        } else {
            peer.known.insert(record.net_id);
            peer.pending.queue_spawn(record.net_id, record.id);
        }
    }

    trace!(
        peer = %peer.token,
        entities = peer.pending.spawns.len(),
        "queue snapshot"
    );
}
