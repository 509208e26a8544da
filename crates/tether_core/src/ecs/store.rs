//! # Entity/Component Store
//!
//! The central container for all entities and components owned by one
//! process. Every mutating accessor stamps the written slot with the change
//! tick and an origin, and marks the entity dirty so the replication scan can
//! find it.

use std::collections::HashMap;

use super::change::{ChangeOrigin, ChangeStamp, PeerToken, Tick};
use super::component::{Component, ComponentTypeId};
use super::dirty::DirtyTracker;
use super::entity::{EntityId, EntityOrigin, EntityRecord, InstanceId, NetId};
use super::storage::{ComponentStorage, ErasedStorage};
use crate::error::{CoreError, CoreResult};

/// Default number of entity slots reserved up front.
const INITIAL_CAPACITY: usize = 256;

/// A component removed from a replicated entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemovalRecord {
    /// Local entity.
    pub entity: EntityId,
    /// Network identity of the entity.
    pub net_id: NetId,
    /// Removed component type.
    pub type_id: ComponentTypeId,
    /// When and by whom.
    pub stamp: ChangeStamp,
}

/// A replicated entity that was destroyed, or lost its Replicate marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DespawnRecord {
    /// Local entity (may already be dead).
    pub entity: EntityId,
    /// Network identity of the entity.
    pub net_id: NetId,
    /// When and by whom.
    pub stamp: ChangeStamp,
    /// Whether the entity was local or a mirror.
    pub entity_origin: EntityOrigin,
}

/// Everything that changed in the store since the previous
/// [`Store::take_changes`].
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// Tick at which the changes were taken.
    pub tick: Tick,
    /// Live entities that were written (inserts, updates, Replicate tagging).
    pub dirty: Vec<EntityId>,
    /// Component tombstones.
    pub removals: Vec<RemovalRecord>,
    /// Entity tombstones.
    pub despawns: Vec<DespawnRecord>,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.removals.is_empty() && self.despawns.is_empty()
    }
}

/// The store - container for one process's view of robot state.
///
/// Entities live in an arena of generation-checked slots. Components live in
/// one flat table per component type, keyed by [`ComponentTypeId`].
///
/// # Example
///
/// ```rust,ignore
/// let mut store = Store::new();
/// let e = store.spawn_replicated();
/// store.insert(e, Position::new(0.0, 0.0, 0.0))?;
/// ```
pub struct Store {
    /// All entity slots.
    entities: Vec<EntityRecord>,
    /// Free list of entity indices for reuse.
    free_indices: Vec<u32>,
    /// Number of currently alive entities.
    alive_count: usize,
    /// One table per component type.
    storages: HashMap<ComponentTypeId, Box<dyn ErasedStorage>>,
    /// This process's namespace for network ids.
    instance: InstanceId,
    /// Next serial handed out in our namespace.
    next_serial: u64,
    /// Reverse index from network id to live entity.
    net_index: HashMap<NetId, EntityId>,
    /// Current tick.
    tick: Tick,
    /// Changes up to `tick` have been taken; new writes belong to the next tick.
    sealed: bool,
    /// Entities written since the last scan.
    dirty: DirtyTracker,
    /// Component tombstones since the last scan.
    removals: Vec<RemovalRecord>,
    /// Entity tombstones since the last scan.
    despawns: Vec<DespawnRecord>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store with a random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_instance(InstanceId::random())
    }

    /// Creates a store allocating network ids from `instance`.
    #[must_use]
    pub fn with_instance(instance: InstanceId) -> Self {
        Self {
            entities: Vec::with_capacity(INITIAL_CAPACITY),
            free_indices: Vec::new(),
            alive_count: 0,
            storages: HashMap::new(),
            instance,
            next_serial: 1,
            net_index: HashMap::new(),
            tick: Tick::ZERO,
            sealed: false,
            dirty: DirtyTracker::new(INITIAL_CAPACITY),
            removals: Vec::new(),
            despawns: Vec::new(),
        }
    }

    /// Returns this store's instance id.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Returns the current tick.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Moves to the next tick and returns it.
    pub fn advance_tick(&mut self) -> Tick {
        self.tick = self.tick.next();
        self.sealed = false;
        self.tick
    }

    /// Tick that new writes are stamped with.
    ///
    /// Equal to [`Store::tick`] until the tick's changes are taken; writes
    /// after that land in the next tick so the next scan sees them.
    #[inline]
    #[must_use]
    pub const fn change_tick(&self) -> Tick {
        if self.sealed {
            self.tick.next()
        } else {
            self.tick
        }
    }

    /// Returns the number of currently alive entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    fn allocate(&mut self, net_id: NetId, origin: EntityOrigin) -> EntityId {
        let id = if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.entities[index as usize];
            // Increment generation to invalidate old references
            let generation = slot.id.generation().wrapping_add(1);
            EntityId::new(index, generation)
        } else {
            let index = self.entities.len() as u32;
            self.entities.push(EntityRecord::dead());
            EntityId::new(index, 0)
        };

        self.entities[id.index() as usize] = EntityRecord::new(id, net_id, origin);
        self.net_index.insert(net_id, id);
        self.alive_count += 1;
        id
    }

    /// Spawns a local entity without the Replicate marker.
    pub fn spawn(&mut self) -> EntityId {
        let net_id = NetId::new(self.instance, self.next_serial);
        self.next_serial += 1;
        self.allocate(net_id, EntityOrigin::Local)
    }

    /// Spawns a local entity that carries the Replicate marker.
    pub fn spawn_replicated(&mut self) -> EntityId {
        let id = self.spawn();
        let tick = self.change_tick();
        self.entities[id.index() as usize].replicate_since = Some(tick);
        self.dirty.mark(id.index() as usize);
        id
    }

    /// Spawns a mirror of a peer's entity.
    ///
    /// Mirrors carry the Replicate marker so local edits flow back to the
    /// owner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NetIdInUse`] if `net_id` already has a live entity.
    pub fn spawn_mirror(&mut self, net_id: NetId, peer: PeerToken) -> CoreResult<EntityId> {
        if self.net_index.contains_key(&net_id) {
            return Err(CoreError::NetIdInUse(net_id));
        }
        let id = self.allocate(net_id, EntityOrigin::Mirror(peer));
        self.entities[id.index() as usize].replicate_since = Some(self.change_tick());
        Ok(id)
    }

    /// Despawns an entity on behalf of local logic.
    ///
    /// Returns `false` if the entity was already dead or the id is stale.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        self.despawn_with(id, ChangeOrigin::Local)
    }

    /// Despawns an entity because `peer` told us to.
    pub fn despawn_from_peer(&mut self, id: EntityId, peer: PeerToken) -> bool {
        self.despawn_with(id, ChangeOrigin::Peer(peer))
    }

    fn despawn_with(&mut self, id: EntityId, origin: ChangeOrigin) -> bool {
        let Some(record) = self.record(id).copied() else {
            return false;
        };

        for storage in self.storages.values_mut() {
            storage.remove_slot(id.index() as usize);
        }

        if record.is_replicated() {
            self.despawns.push(DespawnRecord {
                entity: id,
                net_id: record.net_id,
                stamp: ChangeStamp::new(self.change_tick(), origin),
                entity_origin: record.origin,
            });
        }

        self.net_index.remove(&record.net_id);
        let slot = &mut self.entities[id.index() as usize];
        slot.alive = false;
        slot.replicate_since = None;
        self.free_indices.push(id.index());
        self.alive_count -= 1;
        true
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.record(id).is_some()
    }

    #[inline]
    fn record(&self, id: EntityId) -> Option<&EntityRecord> {
        if id.is_null() {
            return None;
        }
        self.entities
            .get(id.index() as usize)
            .filter(|record| record.alive && record.id == id)
    }

    /// Returns the record of a live entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.record(id)
    }

    /// Iterates over all live entity records.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.iter().filter(|record| record.alive)
    }

    /// Returns the network id of a live entity.
    #[must_use]
    pub fn net_id(&self, id: EntityId) -> Option<NetId> {
        self.record(id).map(|record| record.net_id)
    }

    /// Finds the live entity carrying `net_id`.
    #[must_use]
    pub fn find_net(&self, net_id: NetId) -> Option<EntityId> {
        self.net_index.get(&net_id).copied()
    }

    /// Adds or clears the Replicate marker.
    ///
    /// Clearing it records a despawn tombstone so peers drop their mirrors;
    /// the entity itself stays alive locally.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleEntity`] if the entity is dead.
    pub fn set_replicate(&mut self, id: EntityId, replicate: bool) -> CoreResult<()> {
        let tick = self.change_tick();
        let record = self
            .entities
            .get_mut(id.index() as usize)
            .filter(|record| record.alive && record.id == id)
            .ok_or(CoreError::StaleEntity(id))?;

        match (record.replicate_since, replicate) {
            (None, true) => {
                record.replicate_since = Some(tick);
                self.dirty.mark(id.index() as usize);
            }
            (Some(_), false) => {
                record.replicate_since = None;
                let tombstone = DespawnRecord {
                    entity: id,
                    net_id: record.net_id,
                    stamp: ChangeStamp::new(tick, ChangeOrigin::Local),
                    entity_origin: record.origin,
                };
                self.despawns.push(tombstone);
            }
            _ => {}
        }
        Ok(())
    }

    // =========================================================================
    // Component access
    // =========================================================================

    fn storage<C: Component>(&self) -> Option<&ComponentStorage<C>> {
        self.storages
            .get(&C::TYPE_ID)
            .and_then(|storage| storage.as_any().downcast_ref::<ComponentStorage<C>>())
    }

    fn storage_mut<C: Component>(&mut self) -> CoreResult<&mut ComponentStorage<C>> {
        let capacity = self.entities.capacity();
        self.storages
            .entry(C::TYPE_ID)
            .or_insert_with(|| Box::new(ComponentStorage::<C>::with_capacity(capacity)))
            .as_any_mut()
            .downcast_mut::<ComponentStorage<C>>()
            .ok_or_else(|| CoreError::TypeMismatch {
                type_id: C::TYPE_ID,
                name: C::NAME.to_owned(),
            })
    }

    fn write<C: Component>(
        &mut self,
        id: EntityId,
        value: C,
        origin: ChangeOrigin,
    ) -> CoreResult<Option<C>> {
        if !self.is_alive(id) {
            return Err(CoreError::StaleEntity(id));
        }
        let stamp = ChangeStamp::new(self.change_tick(), origin);
        let previous = self.storage_mut::<C>()?.insert(id.index() as usize, value, stamp);
        self.dirty.mark(id.index() as usize);
        Ok(previous)
    }

    /// Inserts or overwrites a component on behalf of local logic.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleEntity`] for a dead entity, or
    /// [`CoreError::TypeMismatch`] if another type owns `C::TYPE_ID`.
    pub fn insert<C: Component>(&mut self, id: EntityId, value: C) -> CoreResult<Option<C>> {
        self.write(id, value, ChangeOrigin::Local)
    }

    /// Inserts or overwrites a component applied from `peer`'s stream.
    ///
    /// # Errors
    ///
    /// Same as [`Store::insert`].
    pub fn insert_from_peer<C: Component>(
        &mut self,
        id: EntityId,
        value: C,
        peer: PeerToken,
    ) -> CoreResult<Option<C>> {
        self.write(id, value, ChangeOrigin::Peer(peer))
    }

    /// Gets a component.
    #[must_use]
    pub fn get<C: Component>(&self, id: EntityId) -> Option<&C> {
        self.record(id)?;
        self.storage::<C>()?
            .get(id.index() as usize)
            .map(|slot| &slot.value)
    }

    /// Gets a component for writing. The slot is stamped as a local write at
    /// the current tick.
    pub fn get_mut<C: Component>(&mut self, id: EntityId) -> Option<&mut C> {
        self.record(id)?;
        let index = id.index() as usize;
        let stamp = ChangeStamp::new(self.change_tick(), ChangeOrigin::Local);
        let storage = self
            .storages
            .get_mut(&C::TYPE_ID)?
            .as_any_mut()
            .downcast_mut::<ComponentStorage<C>>()?;
        let value = storage.get_mut(index, stamp)?;
        self.dirty.mark(index);
        Some(value)
    }

    /// Removes a component on behalf of local logic.
    pub fn remove<C: Component>(&mut self, id: EntityId) -> Option<C> {
        self.remove_typed(id, ChangeOrigin::Local)
    }

    /// Removes a component because `peer` told us to.
    pub fn remove_from_peer<C: Component>(&mut self, id: EntityId, peer: PeerToken) -> Option<C> {
        self.remove_typed(id, ChangeOrigin::Peer(peer))
    }

    fn remove_typed<C: Component>(&mut self, id: EntityId, origin: ChangeOrigin) -> Option<C> {
        let record = *self.record(id)?;
        let storage = self
            .storages
            .get_mut(&C::TYPE_ID)?
            .as_any_mut()
            .downcast_mut::<ComponentStorage<C>>()?;
        let removed = storage.remove(id.index() as usize)?;
        self.record_removal(&record, C::TYPE_ID, origin);
        Some(removed)
    }

    /// Removes a component by wire id, without knowing its Rust type.
    ///
    /// Returns whether a value was present.
    pub fn remove_by_type(
        &mut self,
        id: EntityId,
        type_id: ComponentTypeId,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(record) = self.record(id).copied() else {
            return false;
        };
        let removed = self
            .storages
            .get_mut(&type_id)
            .is_some_and(|storage| storage.remove_slot(id.index() as usize));
        if removed {
            self.record_removal(&record, type_id, origin);
        }
        removed
    }

    fn record_removal(&mut self, record: &EntityRecord, type_id: ComponentTypeId, origin: ChangeOrigin) {
        if record.is_replicated() {
            self.removals.push(RemovalRecord {
                entity: record.id,
                net_id: record.net_id,
                type_id,
                stamp: ChangeStamp::new(self.change_tick(), origin),
            });
        }
    }

    /// Returns true if the entity holds a `C`.
    #[must_use]
    pub fn has<C: Component>(&self, id: EntityId) -> bool {
        self.get::<C>(id).is_some()
    }

    /// Returns true if the entity holds a component with wire id `type_id`.
    #[must_use]
    pub fn has_type(&self, id: EntityId, type_id: ComponentTypeId) -> bool {
        self.record(id).is_some()
            && self
                .storages
                .get(&type_id)
                .is_some_and(|storage| storage.contains(id.index() as usize))
    }

    /// Returns the stamp of the last write to a component slot.
    #[must_use]
    pub fn stamp_of(&self, id: EntityId, type_id: ComponentTypeId) -> Option<ChangeStamp> {
        self.record(id)?;
        self.storages.get(&type_id)?.stamp(id.index() as usize)
    }

    /// Lists the component types present on an entity, in id order.
    #[must_use]
    pub fn component_types(&self, id: EntityId) -> Vec<ComponentTypeId> {
        if self.record(id).is_none() {
            return Vec::new();
        }
        let mut types: Vec<ComponentTypeId> = self
            .storages
            .iter()
            .filter(|(_, storage)| storage.contains(id.index() as usize))
            .map(|(type_id, _)| *type_id)
            .collect();
        types.sort_unstable();
        types
    }

    /// Iterates over every live entity holding a `C`.
    pub fn query<C: Component>(&self) -> impl Iterator<Item = (EntityId, &C)> {
        self.storage::<C>().into_iter().flat_map(move |storage| {
            storage.iter().filter_map(move |(index, slot)| {
                self.entities
                    .get(index)
                    .filter(|record| record.alive)
                    .map(|record| (record.id, &slot.value))
            })
        })
    }

    // =========================================================================
    // Change draining
    // =========================================================================

    /// Takes every change recorded since the previous call.
    pub fn take_changes(&mut self) -> ChangeSet {
        let dirty = self
            .dirty
            .drain()
            .into_iter()
            .filter_map(|index| self.entities.get(index))
            .filter(|record| record.alive)
            .map(|record| record.id)
            .collect();

        let changes = ChangeSet {
            tick: self.tick,
            dirty,
            removals: std::mem::take(&mut self.removals),
            despawns: std::mem::take(&mut self.despawns),
        };
        self.sealed = true;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DepthTarget, Name, Position};

    #[test]
    fn test_spawn_despawn() {
        let mut store = Store::with_instance(InstanceId(9));

        let e1 = store.spawn();
        let e2 = store.spawn();
        assert_eq!(store.alive_count(), 2);
        assert_ne!(store.net_id(e1), store.net_id(e2));

        assert!(store.despawn(e1));
        assert!(!store.is_alive(e1));
        assert!(!store.despawn(e1));

        // Slot is reused with a new generation
        let e3 = store.spawn();
        assert_eq!(e3.index(), e1.index());
        assert_ne!(e3.generation(), e1.generation());
        assert!(store.get::<Position>(e1).is_none());
    }

    #[test]
    fn test_insert_stamps_current_tick() {
        let mut store = Store::with_instance(InstanceId(1));
        let e = store.spawn_replicated();
        store.advance_tick();
        store.advance_tick();

        store.insert(e, Position::new(1.0, 0.0, 0.0)).unwrap();
        let stamp = store.stamp_of(e, Position::TYPE_ID).unwrap();
        assert_eq!(stamp, ChangeStamp::new(Tick(2), ChangeOrigin::Local));

        store.advance_tick();
        store.insert_from_peer(e, Position::new(2.0, 0.0, 0.0), PeerToken(4)).unwrap();
        let stamp = store.stamp_of(e, Position::TYPE_ID).unwrap();
        assert_eq!(stamp.origin, ChangeOrigin::Peer(PeerToken(4)));
    }

    #[test]
    fn test_get_mut_marks_dirty_and_local() {
        let mut store = Store::with_instance(InstanceId(1));
        let e = store.spawn_replicated();
        store
            .insert_from_peer(e, DepthTarget(1.0), PeerToken(2))
            .unwrap();
        let _ = store.take_changes();

        store.advance_tick();
        if let Some(target) = store.get_mut::<DepthTarget>(e) {
            target.0 = 3.0;
        }

        let changes = store.take_changes();
        assert_eq!(changes.dirty, vec![e]);
        assert_eq!(
            store.stamp_of(e, DepthTarget::TYPE_ID).map(|s| s.origin),
            Some(ChangeOrigin::Local)
        );
    }

    #[test]
    fn test_writes_after_take_belong_to_next_tick() {
        let mut store = Store::with_instance(InstanceId(1));
        let e = store.spawn_replicated();
        store.advance_tick();
        let changes = store.take_changes();
        assert_eq!(changes.tick, Tick(1));

        store.insert(e, DepthTarget(2.0)).unwrap();
        let stamp = store.stamp_of(e, DepthTarget::TYPE_ID).unwrap();
        assert_eq!(stamp.tick, Tick(2));
        assert!(stamp.is_pending_for(PeerToken(7), changes.tick));

        assert_eq!(store.advance_tick(), Tick(2));
        assert_eq!(store.change_tick(), Tick(2));
    }

    #[test]
    fn test_tombstones_only_for_replicated() {
        let mut store = Store::with_instance(InstanceId(1));
        let plain = store.spawn();
        let shared = store.spawn_replicated();
        store.insert(plain, Name::new("plain")).unwrap();
        store.insert(shared, Name::new("shared")).unwrap();

        assert!(store.remove::<Name>(plain).is_some());
        assert!(store.remove::<Name>(shared).is_some());
        store.despawn(plain);
        store.despawn(shared);

        let changes = store.take_changes();
        assert_eq!(changes.removals.len(), 1);
        assert_eq!(changes.removals[0].entity, shared);
        assert_eq!(changes.despawns.len(), 1);
        assert_eq!(changes.despawns[0].entity, shared);
        assert!(changes.dirty.is_empty());
    }

    #[test]
    fn test_clearing_replicate_records_despawn() {
        let mut store = Store::with_instance(InstanceId(1));
        let e = store.spawn_replicated();
        let _ = store.take_changes();

        store.set_replicate(e, false).unwrap();
        let changes = store.take_changes();
        assert_eq!(changes.despawns.len(), 1);
        assert!(store.is_alive(e));
        assert!(!store.entity(e).unwrap().is_replicated());
    }

    #[test]
    fn test_mirror_rejects_duplicate_net_id() {
        let mut store = Store::with_instance(InstanceId(1));
        let remote = NetId::new(InstanceId(2), 5);
        let mirror = store.spawn_mirror(remote, PeerToken(1)).unwrap();

        assert_eq!(store.find_net(remote), Some(mirror));
        assert_eq!(
            store.spawn_mirror(remote, PeerToken(1)),
            Err(CoreError::NetIdInUse(remote))
        );

        store.despawn_from_peer(mirror, PeerToken(1));
        assert_eq!(store.find_net(remote), None);
    }

    #[test]
    fn test_query_and_component_types() {
        let mut store = Store::with_instance(InstanceId(1));
        let a = store.spawn();
        let b = store.spawn();
        store.insert(a, Position::default()).unwrap();
        store.insert(a, Name::new("a")).unwrap();
        store.insert(b, Position::new(1.0, 1.0, 1.0)).unwrap();

        assert_eq!(store.query::<Position>().count(), 2);
        assert_eq!(
            store.component_types(a),
            vec![Name::TYPE_ID, Position::TYPE_ID]
        );
        assert!(store.remove_by_type(a, Name::TYPE_ID, ChangeOrigin::Local));
        assert!(!store.has::<Name>(a));
    }
}
