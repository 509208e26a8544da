//! # Component Registry
//!
//! Maps stable wire ids to type-erased function tables, populated once at
//! startup. The replication layer only ever sees a [`ComponentTypeId`] and
//! raw bytes; the registry turns those back into typed store writes.
//!
//! Payloads are `bincode` encodings of the component's serde representation.

use std::any::TypeId;
use std::collections::HashMap;

use crate::ecs::{Component, ComponentTypeId, EntityId, PeerToken, Store};
use crate::error::{CoreError, CoreResult};

type EncodeFn = fn(&Store, EntityId) -> CoreResult<Option<Vec<u8>>>;
type ApplyFn = fn(&mut Store, EntityId, &[u8], PeerToken) -> CoreResult<()>;
type RemoveFn = fn(&mut Store, EntityId, PeerToken) -> bool;

/// Function table for one registered component type.
#[derive(Clone, Copy)]
pub struct ComponentRegistration {
    /// Wire id.
    pub type_id: ComponentTypeId,
    /// Human-readable name.
    pub name: &'static str,
    rust_type: TypeId,
    encode: EncodeFn,
    apply: ApplyFn,
    remove: RemoveFn,
}

impl std::fmt::Debug for ComponentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistration")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Serializes a component value to its wire payload.
///
/// # Errors
///
/// Returns [`CoreError::Encode`] if the serializer rejects the value.
pub fn encode_value<C: Component>(value: &C) -> CoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CoreError::Encode {
            name: C::NAME.to_owned(),
            reason: e.to_string(),
        }
    })
}

/// Deserializes a wire payload. The payload must be consumed exactly.
///
/// # Errors
///
/// Returns [`CoreError::Decode`] for malformed or over-long payloads.
pub fn decode_value<C: Component>(bytes: &[u8]) -> CoreResult<C> {
    let (value, read) =
        bincode::serde::decode_from_slice::<C, _>(bytes, bincode::config::standard()).map_err(
            |e| CoreError::Decode {
                name: C::NAME.to_owned(),
                reason: e.to_string(),
            },
        )?;
    if read != bytes.len() {
        return Err(CoreError::Decode {
            name: C::NAME.to_owned(),
            reason: format!("{} trailing bytes", bytes.len() - read),
        });
    }
    Ok(value)
}

fn encode_erased<C: Component>(store: &Store, entity: EntityId) -> CoreResult<Option<Vec<u8>>> {
    store.get::<C>(entity).map(encode_value).transpose()
}

fn apply_erased<C: Component>(
    store: &mut Store,
    entity: EntityId,
    bytes: &[u8],
    peer: PeerToken,
) -> CoreResult<()> {
    let value = decode_value::<C>(bytes)?;
    store.insert_from_peer(entity, value, peer)?;
    Ok(())
}

fn remove_erased<C: Component>(store: &mut Store, entity: EntityId, peer: PeerToken) -> bool {
    store.remove_from_peer::<C>(entity, peer).is_some()
}

/// Registry of replicable component types.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    entries: HashMap<ComponentTypeId, ComponentRegistration>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `C` under `C::TYPE_ID`.
    ///
    /// Registering the same type twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateTypeId`] if a different type already
    /// owns the id.
    pub fn register<C: Component>(&mut self) -> CoreResult<&mut Self> {
        if let Some(existing) = self.entries.get(&C::TYPE_ID) {
            if existing.rust_type == TypeId::of::<C>() {
                return Ok(self);
            }
            return Err(CoreError::DuplicateTypeId {
                type_id: C::TYPE_ID,
                existing: existing.name.to_owned(),
                incoming: C::NAME.to_owned(),
            });
        }

        self.entries.insert(
            C::TYPE_ID,
            ComponentRegistration {
                type_id: C::TYPE_ID,
                name: C::NAME,
                rust_type: TypeId::of::<C>(),
                encode: encode_erased::<C>,
                apply: apply_erased::<C>,
                remove: remove_erased::<C>,
            },
        );
        tracing::debug!(type_id = C::TYPE_ID.0, name = C::NAME, "registered component");
        Ok(self)
    }

    /// Returns true if `type_id` is registered.
    #[must_use]
    pub fn contains(&self, type_id: ComponentTypeId) -> bool {
        self.entries.contains_key(&type_id)
    }

    /// Returns the registration for `type_id`.
    #[must_use]
    pub fn get(&self, type_id: ComponentTypeId) -> Option<&ComponentRegistration> {
        self.entries.get(&type_id)
    }

    /// Returns the name registered for `type_id`, or `"?"`.
    #[must_use]
    pub fn name_of(&self, type_id: ComponentTypeId) -> &'static str {
        self.entries.get(&type_id).map_or("?", |entry| entry.name)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered ids, ascending.
    #[must_use]
    pub fn type_ids(&self) -> Vec<ComponentTypeId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Registered component types present on `entity`, ascending.
    #[must_use]
    pub fn replicable_types(&self, store: &Store, entity: EntityId) -> Vec<ComponentTypeId> {
        store
            .component_types(entity)
            .into_iter()
            .filter(|type_id| self.contains(*type_id))
            .collect()
    }

    /// Serializes the current value of a component.
    ///
    /// Returns `Ok(None)` if the entity does not hold it.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownType`] or [`CoreError::Encode`].
    pub fn encode(
        &self,
        store: &Store,
        entity: EntityId,
        type_id: ComponentTypeId,
    ) -> CoreResult<Option<Vec<u8>>> {
        let entry = self.get(type_id).ok_or(CoreError::UnknownType(type_id))?;
        (entry.encode)(store, entity)
    }

    /// Decodes `bytes` and writes the value into `entity`, stamped as coming
    /// from `peer`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownType`], [`CoreError::Decode`] or
    /// [`CoreError::StaleEntity`].
    pub fn apply(
        &self,
        store: &mut Store,
        entity: EntityId,
        type_id: ComponentTypeId,
        bytes: &[u8],
        peer: PeerToken,
    ) -> CoreResult<()> {
        let entry = self.get(type_id).ok_or(CoreError::UnknownType(type_id))?;
        (entry.apply)(store, entity, bytes, peer)
    }

    /// Removes a component on behalf of `peer`. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownType`].
    pub fn remove(
        &self,
        store: &mut Store,
        entity: EntityId,
        type_id: ComponentTypeId,
        peer: PeerToken,
    ) -> CoreResult<bool> {
        let entry = self.get(type_id).ok_or(CoreError::UnknownType(type_id))?;
        Ok((entry.remove)(store, entity, peer))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::components::{register_components, DepthMeasurement, Name, Position};
    use crate::ecs::{ChangeOrigin, InstanceId};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Impostor(u8);

    impl Component for Impostor {
        const TYPE_ID: ComponentTypeId = Position::TYPE_ID;
        const NAME: &'static str = "Impostor";
    }

    #[test]
    fn test_duplicate_type_id_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Position>().unwrap();
        registry.register::<Position>().unwrap();

        let err = registry.register::<Impostor>().unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTypeId { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_encode_apply_through_table() {
        let mut registry = ComponentRegistry::new();
        register_components(&mut registry).unwrap();

        let mut source = Store::with_instance(InstanceId(1));
        let mut target = Store::with_instance(InstanceId(2));
        let e = source.spawn_replicated();
        let m = target.spawn();
        let reading = DepthMeasurement {
            depth: 4.5,
            altitude: 1.25,
            pressure: 1450.0,
        };
        source.insert(e, reading).unwrap();

        let bytes = registry
            .encode(&source, e, DepthMeasurement::TYPE_ID)
            .unwrap()
            .unwrap();
        registry
            .apply(&mut target, m, DepthMeasurement::TYPE_ID, &bytes, PeerToken(3))
            .unwrap();

        assert_eq!(target.get::<DepthMeasurement>(m), Some(&reading));
        assert_eq!(
            target.stamp_of(m, DepthMeasurement::TYPE_ID).map(|s| s.origin),
            Some(ChangeOrigin::Peer(PeerToken(3)))
        );
        assert!(registry.encode(&source, e, Name::TYPE_ID).unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let mut registry = ComponentRegistry::new();
        register_components(&mut registry).unwrap();
        let mut store = Store::with_instance(InstanceId(1));
        let e = store.spawn();

        let err = registry
            .apply(&mut store, e, Position::TYPE_ID, &[1, 2], PeerToken(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));

        let mut padded = encode_value(&Position::new(1.0, 2.0, 3.0)).unwrap();
        padded.push(0);
        assert!(decode_value::<Position>(&padded).is_err());
        assert!(!store.has::<Position>(e));
    }

    #[test]
    fn test_unknown_type() {
        let registry = ComponentRegistry::new();
        let store = Store::with_instance(InstanceId(1));
        assert_eq!(
            registry.encode(&store, EntityId::new(0, 0), ComponentTypeId(999)),
            Err(CoreError::UnknownType(ComponentTypeId(999)))
        );
    }
}
