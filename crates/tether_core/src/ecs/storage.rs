//! # Component Storage
//!
//! Dense, index-addressed component tables.
//!
//! The storage uses a dense array strategy:
//! - One slot per entity index, grown on demand
//! - Access is O(1) via entity index
//! - Each occupied slot carries the [`ChangeStamp`] of its last write

use std::any::Any;

use super::change::ChangeStamp;
use super::component::{Component, ComponentTypeId};

/// A component value together with its last-write stamp.
#[derive(Clone, Debug, PartialEq)]
pub struct Stamped<C> {
    /// The component value.
    pub value: C,
    /// When and by whom it was last written.
    pub stamp: ChangeStamp,
}

/// Storage for a single component type, indexed by entity index.
pub struct ComponentStorage<C: Component> {
    /// The dense array of component slots.
    slots: Vec<Option<Stamped<C>>>,
    /// Number of occupied slots.
    len: usize,
}

impl<C: Component> ComponentStorage<C> {
    /// Creates empty storage with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, len: 0 }
    }

    /// Returns the number of occupied slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets a component by entity index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Stamped<C>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Gets a mutable component by entity index, re-stamping it.
    #[inline]
    pub fn get_mut(&mut self, index: usize, stamp: ChangeStamp) -> Option<&mut C> {
        let slot = self.slots.get_mut(index)?.as_mut()?;
        slot.stamp = stamp;
        Some(&mut slot.value)
    }

    /// Sets a component at the specified index, returning the old value.
    pub fn insert(&mut self, index: usize, value: C, stamp: ChangeStamp) -> Option<C> {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let previous = self.slots[index].replace(Stamped { value, stamp });
        if previous.is_none() {
            self.len += 1;
        }
        previous.map(|old| old.value)
    }

    /// Removes the component at `index`.
    pub fn remove(&mut self, index: usize) -> Option<C> {
        let removed = self.slots.get_mut(index)?.take();
        if removed.is_some() {
            self.len -= 1;
        }
        removed.map(|old| old.value)
    }

    /// Iterates over occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Stamped<C>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|s| (index, s)))
    }
}

/// Type-erased view of a [`ComponentStorage`], used where the store only
/// knows a [`ComponentTypeId`].
pub trait ErasedStorage: Send + Sync {
    /// Wire id of the stored type.
    fn type_id(&self) -> ComponentTypeId;
    /// Returns true if `index` holds a value.
    fn contains(&self, index: usize) -> bool;
    /// Returns the stamp of the value at `index`.
    fn stamp(&self, index: usize) -> Option<ChangeStamp>;
    /// Drops the value at `index`; returns whether one was present.
    fn remove_slot(&mut self, index: usize) -> bool;
    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
    /// Downcasting support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedStorage for ComponentStorage<C> {
    fn type_id(&self) -> ComponentTypeId {
        C::TYPE_ID
    }

    fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    fn stamp(&self, index: usize) -> Option<ChangeStamp> {
        self.get(index).map(|slot| slot.stamp)
    }

    fn remove_slot(&mut self, index: usize) -> bool {
        self.remove(index).is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
