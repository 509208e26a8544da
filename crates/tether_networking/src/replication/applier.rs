//! # Replication Applier
//!
//! Applies one inbound frame body from a peer to the store.
//!
//! ## Resolution
//!
//! - A remote id resolves through the peer's mirror map
//! - An id we created resolves to our own entity (the peer edits it);
//!   such entities accept updates and removals but never spawn or despawn
//! - Anything else is stale and ignored
//!
//! ## Snapshots
//!
//! Ops between `SnapshotBegin` and `SnapshotEnd` are staged. On
//! `SnapshotEnd` the staged world replaces the peer's mirrors in one step:
//! stale mirrors are despawned, surviving mirrors keep their local ids and
//! get their component sets replaced, new ones are spawned.

use std::collections::HashSet;

use tether_core::{ComponentRegistry, ComponentTypeId, EntityId, NetId, Store, Tick};
use tracing::{debug, warn};

use super::peer::{PeerLink, StagedEntity, Staging};
use crate::error::WireError;
use crate::protocol::{ComponentPayload, Op, OpReader};

/// What applying one frame did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Ops that changed the store or the staged snapshot.
    pub applied: usize,
    /// Ops or values skipped as stale, unknown or malformed.
    pub ignored: usize,
    /// Acknowledgement received: our tick the peer has applied.
    pub acked: Option<Tick>,
    /// A snapshot was committed.
    pub snapshot_completed: bool,
    /// Structural error that stopped the frame.
    pub error: Option<WireError>,
}

/// Applies every op in `body`. Stops at the first structurally malformed op;
/// everything before it stays applied.
pub fn apply_frame(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    body: &[u8],
) -> ApplyReport {
    let mut report = ApplyReport::default();
    let mut reader = OpReader::new(body);
    loop {
        match reader.next_op() {
            Ok(Some(op)) => apply_op(store, registry, peer, op, &mut report),
            Ok(None) => break,
            Err(err) => {
                warn!(
                    peer = %peer.token,
                    error = %err,
                    remaining = reader.remaining(),
                    "malformed op, rest of frame skipped"
                );
                report.error = Some(err);
                break;
            }
        }
    }
    report
}

fn apply_op(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    op: Op,
    report: &mut ApplyReport,
) {
    match op {
        Op::Hello(_) => {
            debug!(peer = %peer.token, "hello after handshake ignored");
            report.ignored += 1;
        }
        Op::Heartbeat => {}
        Op::Ack { tick } => {
            report.acked = Some(report.acked.map_or(tick, |acked| acked.max(tick)));
        }
        Op::SnapshotBegin { tick } => {
            peer.observe_remote_tick(tick);
            if peer.staging.is_some() {
                debug!(peer = %peer.token, "snapshot restarted before completion");
            }
            peer.staging = Some(Staging {
                tick,
                entities: Default::default(),
            });
        }
        Op::SnapshotEnd { tick } => {
            peer.observe_remote_tick(tick);
            match peer.staging.take() {
                Some(staging) => {
                    commit_snapshot(store, registry, peer, staging, report);
                    report.snapshot_completed = true;
                }
                None => {
                    warn!(peer = %peer.token, tick = %tick, "snapshot end without begin");
                    report.ignored += 1;
                }
            }
        }
        Op::Spawn {
            net_id,
            tick,
            components,
        } => {
            peer.observe_remote_tick(tick);
            if let Some(staging) = peer.staging.as_mut() {
                staging
                    .entities
                    .insert(net_id, StagedEntity::from_payloads(tick, components));
                report.applied += 1;
            } else {
                apply_spawn(store, registry, peer, net_id, tick, components, report);
            }
        }
        Op::Update {
            net_id,
            type_id,
            tick,
            bytes,
        } => {
            peer.observe_remote_tick(tick);
            if let Some(staged) = staged_entity(peer, net_id) {
                staged.components.insert(type_id, bytes);
                report.applied += 1;
                return;
            }
            let Some(entity) = resolve(store, peer, net_id) else {
                debug!(peer = %peer.token, net_id = %net_id, "update for unknown entity");
                report.ignored += 1;
                return;
            };
            apply_component(store, registry, peer, entity, type_id, tick, &bytes, report);
        }
        Op::Remove {
            net_id,
            type_id,
            tick,
        } => {
            peer.observe_remote_tick(tick);
            if let Some(staged) = staged_entity(peer, net_id) {
                staged.components.remove(&type_id);
                report.applied += 1;
                return;
            }
            let Some(entity) = resolve(store, peer, net_id) else {
                debug!(peer = %peer.token, net_id = %net_id, "remove for unknown entity");
                report.ignored += 1;
                return;
            };
            remove_component(store, registry, peer, entity, type_id, tick, report);
        }
        Op::Despawn { net_id, tick } => {
            peer.observe_remote_tick(tick);
            if let Some(staging) = peer.staging.as_mut() {
                if staging.entities.remove(&net_id).is_some() {
                    report.applied += 1;
                    return;
                }
            }
            let Some(entity) = peer.mirrors.remove_remote(net_id) else {
                debug!(peer = %peer.token, net_id = %net_id, "despawn for unknown mirror");
                report.ignored += 1;
                return;
            };
            store.despawn_from_peer(entity, peer.token);
            peer.forget_applied(entity);
            report.applied += 1;
        }
    }
}

fn staged_entity(peer: &mut PeerLink, net_id: NetId) -> Option<&mut StagedEntity> {
    peer.staging.as_mut()?.entities.get_mut(&net_id)
}

/// Local entity for a remote id: our mirror of it, or our own entity.
fn resolve(store: &Store, peer: &PeerLink, net_id: NetId) -> Option<EntityId> {
    if let Some(local) = peer.mirrors.local(net_id) {
        return Some(local);
    }
    if net_id.origin == store.instance() {
        return store.find_net(net_id);
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn apply_component(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    entity: EntityId,
    type_id: ComponentTypeId,
    tick: Tick,
    bytes: &[u8],
    report: &mut ApplyReport,
) {
    if !registry.contains(type_id) {
        warn!(peer = %peer.token, type_id = %type_id, "unknown component type skipped");
        report.ignored += 1;
        return;
    }
    if peer
        .last_applied
        .get(&(entity, type_id))
        .is_some_and(|last| tick <= *last)
    {
        report.ignored += 1;
        return;
    }
    match registry.apply(store, entity, type_id, bytes, peer.token) {
        Ok(()) => {
            peer.last_applied.insert((entity, type_id), tick);
            report.applied += 1;
        }
        Err(err) => {
            warn!(
                peer = %peer.token,
                entity = %entity,
                type_id = %type_id,
                error = %err,
                "component value skipped"
            );
            report.ignored += 1;
        }
    }
}

fn remove_component(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    entity: EntityId,
    type_id: ComponentTypeId,
    tick: Tick,
    report: &mut ApplyReport,
) {
    if peer
        .last_applied
        .get(&(entity, type_id))
        .is_some_and(|last| tick <= *last)
    {
        report.ignored += 1;
        return;
    }
    match registry.remove(store, entity, type_id, peer.token) {
        Ok(_) => {
            peer.last_applied.insert((entity, type_id), tick);
            report.applied += 1;
        }
        Err(err) => {
            warn!(peer = %peer.token, type_id = %type_id, error = %err, "removal skipped");
            report.ignored += 1;
        }
    }
}

fn apply_spawn(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    net_id: NetId,
    tick: Tick,
    components: Vec<ComponentPayload>,
    report: &mut ApplyReport,
) {
    if let Some(entity) = peer.mirrors.local(net_id) {
        let staged = StagedEntity::from_payloads(tick, components);
        replace_components(store, registry, peer, entity, staged, report);
        return;
    }
    if store.find_net(net_id).is_some() {
        debug!(peer = %peer.token, net_id = %net_id, "spawn for entity already present");
        report.ignored += 1;
        return;
    }
    let entity = match store.spawn_mirror(net_id, peer.token) {
        Ok(entity) => entity,
        Err(err) => {
            warn!(peer = %peer.token, error = %err, "mirror spawn failed");
            report.ignored += 1;
            return;
        }
    };
    peer.mirrors.insert(net_id, entity);
    report.applied += 1;
    for payload in components {
        apply_component(
            store,
            registry,
            peer,
            entity,
            payload.type_id,
            tick,
            &payload.bytes,
            report,
        );
    }
}

/// Makes a mirror's registered components match `staged`.
fn replace_components(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    entity: EntityId,
    staged: StagedEntity,
    report: &mut ApplyReport,
) {
    for type_id in registry.replicable_types(store, entity) {
        if !staged.components.contains_key(&type_id) {
            remove_component(store, registry, peer, entity, type_id, staged.tick, report);
        }
    }
    for (type_id, bytes) in &staged.components {
        apply_component(
            store,
            registry,
            peer,
            entity,
            *type_id,
            staged.tick,
            bytes,
            report,
        );
    }
}

fn commit_snapshot(
    store: &mut Store,
    registry: &ComponentRegistry,
    peer: &mut PeerLink,
    staging: Staging,
    report: &mut ApplyReport,
) {
    let stale: Vec<(NetId, EntityId)> = peer
        .mirrors
        .iter()
        .filter(|(remote, _)| !staging.entities.contains_key(remote))
        .collect();
    for (remote, local) in &stale {
        peer.mirrors.remove_remote(*remote);
        store.despawn_from_peer(*local, peer.token);
    }

    // The snapshot is authoritative for every mirror.
    let mirrored: HashSet<EntityId> = peer.mirrors.iter().map(|(_, local)| local).collect();
    peer.last_applied
        .retain(|(entity, _), _| !mirrored.contains(entity) && store.is_alive(*entity));

    let mut spawned = 0usize;
    for (net_id, staged) in staging.entities {
        if let Some(entity) = peer.mirrors.local(net_id) {
            replace_components(store, registry, peer, entity, staged, report);
            continue;
        }
        if store.find_net(net_id).is_some() {
            debug!(peer = %peer.token, net_id = %net_id, "snapshot entity already present");
            continue;
        }
        match store.spawn_mirror(net_id, peer.token) {
            Ok(entity) => {
                peer.mirrors.insert(net_id, entity);
                spawned += 1;
                replace_components(store, registry, peer, entity, staged, report);
            }
            Err(err) => warn!(peer = %peer.token, error = %err, "mirror spawn failed"),
        }
    }

    debug!(
        peer = %peer.token,
        tick = %staging.tick,
        mirrors = peer.mirrors.len(),
        spawned,
        despawned = stale.len(),
        "snapshot committed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameHeader, FrameWriter};
    use tether_core::components::{register_components, DepthTarget, Position};
    use tether_core::registry::encode_value;
    use tether_core::{Component, InstanceId, PeerToken};

    const PEER: PeerToken = PeerToken(2);
    const REMOTE: InstanceId = InstanceId(900);

    fn setup() -> (Store, ComponentRegistry, PeerLink) {
        let mut registry = ComponentRegistry::new();
        register_components(&mut registry).unwrap();
        let mut link = PeerLink::new(PEER, None);
        link.on_connected(REMOTE, None);
        let mut store = Store::with_instance(InstanceId(1));
        store.advance_tick();
        (store, registry, link)
    }

    fn body(ops: &[Op]) -> Vec<u8> {
        let mut writer = FrameWriter::new(4096);
        for op in ops {
            assert!(writer.push(op));
        }
        writer.finish()[FrameHeader::SIZE..].to_vec()
    }

    fn remote(serial: u64) -> NetId {
        NetId::new(REMOTE, serial)
    }

    fn spawn_op(serial: u64, tick: u64, position: Position) -> Op {
        Op::Spawn {
            net_id: remote(serial),
            tick: Tick(tick),
            components: vec![ComponentPayload {
                type_id: Position::TYPE_ID,
                bytes: encode_value(&position).unwrap(),
            }],
        }
    }

    fn update_op(serial: u64, tick: u64, position: Position) -> Op {
        Op::Update {
            net_id: remote(serial),
            type_id: Position::TYPE_ID,
            tick: Tick(tick),
            bytes: encode_value(&position).unwrap(),
        }
    }

    #[test]
    fn test_spawn_update_despawn() {
        let (mut store, registry, mut link) = setup();
        apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[spawn_op(1, 1, Position::new(0.0, 0.0, 0.0))]),
        );
        let mirror = link.mirrors.local(remote(1)).unwrap();
        assert_eq!(store.get::<Position>(mirror), Some(&Position::new(0.0, 0.0, 0.0)));

        apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[update_op(1, 5, Position::new(1.0, 0.0, 0.0))]),
        );
        assert_eq!(store.get::<Position>(mirror).unwrap().x, 1.0);

        apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[Op::Despawn {
                net_id: remote(1),
                tick: Tick(6),
            }]),
        );
        assert!(!store.is_alive(mirror));
        assert!(link.mirrors.is_empty());
        assert_eq!(link.newest_remote_tick, Some(Tick(6)));
        assert!(link.ack_due);
    }

    #[test]
    fn test_stale_tick_is_discarded() {
        let (mut store, registry, mut link) = setup();
        let frame = body(&[
            spawn_op(1, 1, Position::new(0.0, 0.0, 0.0)),
            update_op(1, 7, Position::new(7.0, 0.0, 0.0)),
            update_op(1, 3, Position::new(3.0, 0.0, 0.0)),
        ]);
        let report = apply_frame(&mut store, &registry, &mut link, &frame);

        let mirror = link.mirrors.local(remote(1)).unwrap();
        assert_eq!(store.get::<Position>(mirror).unwrap().x, 7.0);
        assert_eq!(report.ignored, 1);
    }

    #[test]
    fn test_reapplying_a_frame_is_a_no_op() {
        let (mut store, registry, mut link) = setup();
        let frame = body(&[
            spawn_op(1, 1, Position::new(0.0, 0.0, 0.0)),
            update_op(1, 2, Position::new(2.0, 0.0, 0.0)),
        ]);
        apply_frame(&mut store, &registry, &mut link, &frame);
        let report = apply_frame(&mut store, &registry, &mut link, &frame);

        assert_eq!(store.alive_count(), 1);
        assert_eq!(report.applied, 0);
        let mirror = link.mirrors.local(remote(1)).unwrap();
        assert_eq!(store.get::<Position>(mirror).unwrap().x, 2.0);
    }

    #[test]
    fn test_unknown_type_and_bad_payload_are_skipped() {
        let (mut store, registry, mut link) = setup();
        let frame = body(&[
            spawn_op(1, 1, Position::new(0.0, 0.0, 0.0)),
            Op::Update {
                net_id: remote(1),
                type_id: ComponentTypeId(4000),
                tick: Tick(2),
                bytes: vec![1, 2, 3],
            },
            Op::Update {
                net_id: remote(1),
                type_id: DepthTarget::TYPE_ID,
                tick: Tick(2),
                bytes: vec![1],
            },
            update_op(1, 3, Position::new(3.0, 0.0, 0.0)),
        ]);
        let report = apply_frame(&mut store, &registry, &mut link, &frame);

        let mirror = link.mirrors.local(remote(1)).unwrap();
        assert_eq!(report.ignored, 2);
        assert!(report.error.is_none());
        assert!(!store.has::<DepthTarget>(mirror));
        assert_eq!(store.get::<Position>(mirror).unwrap().x, 3.0);
    }

    #[test]
    fn test_truncated_frame_keeps_earlier_ops() {
        let (mut store, registry, mut link) = setup();
        let mut frame = body(&[spawn_op(1, 1, Position::new(0.0, 0.0, 0.0))]);
        frame.extend_from_slice(&[0x03, 0xAA]);

        let report = apply_frame(&mut store, &registry, &mut link, &frame);
        assert!(report.error.is_some());
        assert_eq!(link.mirrors.len(), 1);
    }

    #[test]
    fn test_stale_ops_for_unknown_entities() {
        let (mut store, registry, mut link) = setup();
        let frame = body(&[
            update_op(5, 1, Position::new(0.0, 0.0, 0.0)),
            Op::Remove {
                net_id: remote(5),
                type_id: Position::TYPE_ID,
                tick: Tick(1),
            },
            Op::Despawn {
                net_id: remote(5),
                tick: Tick(1),
            },
        ]);
        let report = apply_frame(&mut store, &registry, &mut link, &frame);
        assert_eq!(report.ignored, 3);
        assert_eq!(store.alive_count(), 0);
    }

    #[test]
    fn test_peer_edits_our_entity() {
        let (mut store, registry, mut link) = setup();
        let robot = store.spawn_replicated();
        store.insert(robot, DepthTarget(1.0)).unwrap();
        let ours = store.net_id(robot).unwrap();

        let frame = body(&[
            Op::Update {
                net_id: ours,
                type_id: DepthTarget::TYPE_ID,
                tick: Tick(4),
                bytes: encode_value(&DepthTarget(12.5)).unwrap(),
            },
            Op::Despawn {
                net_id: ours,
                tick: Tick(4),
            },
            Op::Spawn {
                net_id: ours,
                tick: Tick(4),
                components: Vec::new(),
            },
        ]);
        let report = apply_frame(&mut store, &registry, &mut link, &frame);

        assert_eq!(store.get::<DepthTarget>(robot), Some(&DepthTarget(12.5)));
        assert!(store.is_alive(robot));
        assert!(link.mirrors.is_empty());
        assert_eq!(report.ignored, 2);
    }

    #[test]
    fn test_snapshot_swaps_atomically() {
        let (mut store, registry, mut link) = setup();
        apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[
                spawn_op(1, 1, Position::new(1.0, 0.0, 0.0)),
                spawn_op(2, 1, Position::new(2.0, 0.0, 0.0)),
                update_op(1, 9, Position::new(9.0, 0.0, 0.0)),
            ]),
        );
        let kept = link.mirrors.local(remote(1)).unwrap();
        let dropped = link.mirrors.local(remote(2)).unwrap();

        // First half: nothing visible yet.
        let report = apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[
                Op::SnapshotBegin { tick: Tick(4) },
                spawn_op(1, 4, Position::new(4.0, 0.0, 0.0)),
            ]),
        );
        assert!(!report.snapshot_completed);
        assert!(store.is_alive(dropped));
        assert_eq!(store.get::<Position>(kept).unwrap().x, 9.0);

        let report = apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[
                spawn_op(3, 4, Position::new(3.0, 0.0, 0.0)),
                Op::SnapshotEnd { tick: Tick(4) },
            ]),
        );
        assert!(report.snapshot_completed);
        assert!(!store.is_alive(dropped));
        assert_eq!(link.mirrors.local(remote(1)), Some(kept));
        assert_eq!(store.get::<Position>(kept).unwrap().x, 4.0);
        let fresh = link.mirrors.local(remote(3)).unwrap();
        assert_eq!(store.get::<Position>(fresh).unwrap().x, 3.0);
        assert_eq!(link.mirrors.len(), 2);
    }

    #[test]
    fn test_ack_reported() {
        let (mut store, registry, mut link) = setup();
        let report = apply_frame(
            &mut store,
            &registry,
            &mut link,
            &body(&[Op::Ack { tick: Tick(3) }, Op::Heartbeat]),
        );
        assert_eq!(report.acked, Some(Tick(3)));
        assert!(!link.ack_due);
    }
}
