//! # Replication Encoder
//!
//! Serializes a [`PendingBatch`] into frames no larger than the body budget.
//!
//! ## Op order
//!
//! `SnapshotBegin`, spawns, updates, removals, despawns, `SnapshotEnd`, then
//! `Ack`. Frames are sent in order on one stream, so a spawn always reaches
//! the peer before anything else about that entity.
//!
//! ## Failure handling
//!
//! A value that fails to serialize, or an op that cannot fit in an empty
//! frame, is dropped with a warning. The rest of the batch still goes out.
//! A spawn too large for one frame is split into an empty spawn followed by
//! one update per component.

use tether_core::{ComponentRegistry, EntityId, PeerToken, Store, Tick};
use tracing::warn;

use super::peer::PendingBatch;
use crate::protocol::{ComponentPayload, FrameWriter, Op};

/// Packs ops into as many frames as needed.
struct FramePacker {
    max_body: usize,
    current: FrameWriter,
    frames: Vec<Vec<u8>>,
    dropped: usize,
}

impl FramePacker {
    fn new(max_body: usize) -> Self {
        Self {
            max_body,
            current: FrameWriter::new(max_body),
            frames: Vec::new(),
            dropped: 0,
        }
    }

    fn fits_empty(&self, op: &Op) -> bool {
        self.current.fits_empty(op)
    }

    fn push(&mut self, peer: PeerToken, op: &Op) {
        if self.current.push(op) {
            return;
        }
        if !self.current.fits_empty(op) {
            warn!(
                peer = %peer,
                op = ?op.code(),
                len = op.encoded_len(),
                max = self.max_body,
                "op exceeds frame budget, dropped"
            );
            self.dropped += 1;
            return;
        }
        self.seal();
        // Fits an empty frame, checked above.
        let _ = self.current.push(op);
    }

    fn seal(&mut self) {
        let full = std::mem::replace(&mut self.current, FrameWriter::new(self.max_body));
        if !full.is_empty() {
            self.frames.push(full.finish());
        }
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.seal();
        self.frames
    }
}

fn encode_component(
    store: &Store,
    registry: &ComponentRegistry,
    peer: PeerToken,
    entity: EntityId,
    type_id: tether_core::ComponentTypeId,
) -> Option<Vec<u8>> {
    match registry.encode(store, entity, type_id) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                peer = %peer,
                entity = %entity,
                type_id = %type_id,
                error = %err,
                "component dropped from batch"
            );
            None
        }
    }
}

/// Serializes `batch` for `peer` into complete frames (headers included).
///
/// Values are read from `store` now, so each key carries its latest value.
/// Updates whose current value was written by `peer` are skipped. `ack`, if
/// set, is appended last.
#[must_use]
pub fn encode_batch(
    store: &Store,
    registry: &ComponentRegistry,
    peer: PeerToken,
    batch: PendingBatch,
    tick: Tick,
    ack: Option<Tick>,
    max_body: usize,
) -> Vec<Vec<u8>> {
    let mut packer = FramePacker::new(max_body);

    if let Some(snapshot_tick) = batch.snapshot {
        packer.push(peer, &Op::SnapshotBegin { tick: snapshot_tick });
    }

    for (net_id, entity) in batch.spawns {
        if store.net_id(entity) != Some(net_id) {
            continue;
        }
        let components: Vec<ComponentPayload> = registry
            .replicable_types(store, entity)
            .into_iter()
            .filter_map(|type_id| {
                encode_component(store, registry, peer, entity, type_id)
                    .map(|bytes| ComponentPayload { type_id, bytes })
            })
            .collect();

        let spawn = Op::Spawn {
            net_id,
            tick,
            components,
        };
        if packer.fits_empty(&spawn) {
            packer.push(peer, &spawn);
            continue;
        }

        let Op::Spawn { components, .. } = spawn else {
            continue;
        };
        packer.push(
            peer,
            &Op::Spawn {
                net_id,
                tick,
                components: Vec::new(),
            },
        );
        for payload in components {
            packer.push(
                peer,
                &Op::Update {
                    net_id,
                    type_id: payload.type_id,
                    tick,
                    bytes: payload.bytes,
                },
            );
        }
    }

    for ((net_id, type_id), (entity, _queued)) in batch.updates {
        let Some(stamp) = store.stamp_of(entity, type_id) else {
            continue;
        };
        if stamp.origin.is_from(peer) {
            continue;
        }
        if let Some(bytes) = encode_component(store, registry, peer, entity, type_id) {
            packer.push(
                peer,
                &Op::Update {
                    net_id,
                    type_id,
                    tick: stamp.tick,
                    bytes,
                },
            );
        }
    }

    for ((net_id, type_id), removed_at) in batch.removals {
        packer.push(
            peer,
            &Op::Remove {
                net_id,
                type_id,
                tick: removed_at,
            },
        );
    }

    for (net_id, despawned_at) in batch.despawns {
        packer.push(
            peer,
            &Op::Despawn {
                net_id,
                tick: despawned_at,
            },
        );
    }

    if let Some(snapshot_tick) = batch.snapshot {
        packer.push(peer, &Op::SnapshotEnd { tick: snapshot_tick });
    }
    if let Some(acked) = ack {
        packer.push(peer, &Op::Ack { tick: acked });
    }

    if packer.dropped > 0 {
        warn!(peer = %peer, dropped = packer.dropped, "batch encoded with drops");
    }
    packer.finish()
}
