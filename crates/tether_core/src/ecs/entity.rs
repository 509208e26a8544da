//! # Entity Management
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into component tables
//! - A generation counter for safe reuse
//!
//! Replicated entities additionally carry a [`NetId`], the identity peers use
//! on the wire. Each process allocates `NetId`s only from its own
//! [`InstanceId`] namespace, so two peers can never mint the same id.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::change::{PeerToken, Tick};

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into component tables
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Identity of one running process (robot or console).
///
/// Chosen at random on startup unless configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Picks a fresh random instance id.
    #[must_use]
    pub fn random() -> Self {
        // Zero is reserved so an unset id is recognisable in logs.
        Self(rand::random::<u64>().max(1))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Network-wide entity identity: the creating instance plus a serial that
/// instance never reuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetId {
    /// Instance that created the entity.
    pub origin: InstanceId,
    /// Serial within the origin's namespace.
    pub serial: u64,
}

impl NetId {
    /// Creates a new network id.
    #[inline]
    #[must_use]
    pub const fn new(origin: InstanceId, serial: u64) -> Self {
        Self { origin, serial }
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.serial)
    }
}

/// Who created an entity in this store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityOrigin {
    /// Spawned by local logic; this process owns it.
    Local,
    /// Mirror of an entity owned by (or relayed through) a peer.
    Mirror(PeerToken),
}

/// One entity slot in the store.
#[derive(Clone, Copy, Debug)]
pub struct EntityRecord {
    /// The unique identifier for this entity.
    pub id: EntityId,
    /// Network identity.
    pub net_id: NetId,
    /// Who created it.
    pub origin: EntityOrigin,
    /// Tick at which the entity gained the Replicate marker, if it has it.
    pub replicate_since: Option<Tick>,
    /// Whether this entity slot is currently alive.
    pub alive: bool,
}

impl EntityRecord {
    /// Creates a live entity record.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId, net_id: NetId, origin: EntityOrigin) -> Self {
        Self {
            id,
            net_id,
            origin,
            replicate_since: None,
            alive: true,
        }
    }

    /// Creates a dead/empty entity slot.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: EntityId::NULL,
            net_id: NetId::new(InstanceId(0), 0),
            origin: EntityOrigin::Local,
            replicate_since: None,
            alive: false,
        }
    }

    /// Returns true if the entity carries the Replicate marker.
    #[inline]
    #[must_use]
    pub const fn is_replicated(&self) -> bool {
        self.replicate_since.is_some()
    }

    /// Returns the peer this entity mirrors, if it is a mirror.
    #[inline]
    #[must_use]
    pub const fn mirrored_from(&self) -> Option<PeerToken> {
        match self.origin {
            EntityOrigin::Mirror(peer) => Some(peer),
            EntityOrigin::Local => None,
        }
    }
}

impl Default for EntityRecord {
    fn default() -> Self {
        Self::dead()
    }
}
