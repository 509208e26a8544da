//! Bidirectional remote ↔ local entity mapping for one peer.

use std::collections::HashMap;

use tether_core::{EntityId, NetId};

/// Maps a peer's network ids to our local mirrors and back.
#[derive(Clone, Debug, Default)]
pub struct EntityMap {
    remote_to_local: HashMap<NetId, EntityId>,
    local_to_remote: HashMap<EntityId, NetId>,
}

impl EntityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a mapping, replacing any previous one for either side.
    pub fn insert(&mut self, remote: NetId, local: EntityId) {
        if let Some(old_local) = self.remote_to_local.insert(remote, local) {
            self.local_to_remote.remove(&old_local);
        }
        if let Some(old_remote) = self.local_to_remote.insert(local, remote) {
            if old_remote != remote {
                self.remote_to_local.remove(&old_remote);
            }
        }
    }

    /// Local mirror for a remote id.
    #[inline]
    #[must_use]
    pub fn local(&self, remote: NetId) -> Option<EntityId> {
        self.remote_to_local.get(&remote).copied()
    }

    /// Remote id of a local mirror.
    #[inline]
    #[must_use]
    pub fn remote(&self, local: EntityId) -> Option<NetId> {
        self.local_to_remote.get(&local).copied()
    }

    /// Returns true if `remote` is mapped.
    #[inline]
    #[must_use]
    pub fn contains_remote(&self, remote: NetId) -> bool {
        self.remote_to_local.contains_key(&remote)
    }

    /// Erases by remote id.
    pub fn remove_remote(&mut self, remote: NetId) -> Option<EntityId> {
        let local = self.remote_to_local.remove(&remote)?;
        self.local_to_remote.remove(&local);
        Some(local)
    }

    /// Erases by local id.
    pub fn remove_local(&mut self, local: EntityId) -> Option<NetId> {
        let remote = self.local_to_remote.remove(&local)?;
        self.remote_to_local.remove(&remote);
        Some(remote)
    }

    /// Number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }

    /// Returns true if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }

    /// Iterates `(remote, local)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (NetId, EntityId)> + '_ {
        self.remote_to_local.iter().map(|(remote, local)| (*remote, *local))
    }

    /// Removes and returns every mapping.
    pub fn drain(&mut self) -> Vec<(NetId, EntityId)> {
        self.local_to_remote.clear();
        self.remote_to_local.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::InstanceId;

    fn net(serial: u64) -> NetId {
        NetId::new(InstanceId(7), serial)
    }

    #[test]
    fn test_both_directions() {
        let mut map = EntityMap::new();
        let local = EntityId::new(3, 0);
        map.insert(net(1), local);

        assert_eq!(map.local(net(1)), Some(local));
        assert_eq!(map.remote(local), Some(net(1)));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove_local(local), Some(net(1)));
        assert!(map.is_empty());
        assert_eq!(map.local(net(1)), None);
    }

    #[test]
    fn test_remap_replaces_stale_side() {
        let mut map = EntityMap::new();
        let first = EntityId::new(1, 0);
        let second = EntityId::new(2, 0);
        map.insert(net(1), first);
        map.insert(net(1), second);

        assert_eq!(map.local(net(1)), Some(second));
        assert_eq!(map.remote(first), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_drain_empties_both_sides() {
        let mut map = EntityMap::new();
        map.insert(net(1), EntityId::new(1, 0));
        map.insert(net(2), EntityId::new(2, 0));

        let mut drained = map.drain();
        drained.sort_by_key(|(remote, _)| remote.serial);
        assert_eq!(drained.len(), 2);
        assert!(map.is_empty());
        assert_eq!(map.remote(EntityId::new(1, 0)), None);
    }
}
