//! # Entity/Component Store
//!
//! ## Design Philosophy
//!
//! - Entities are arena indices with generation counters
//! - Components are stored in one flat table per type
//! - Every write is stamped with a tick and an origin
//! - No global state: the [`Store`] is an explicit value passed around

mod change;
mod component;
mod dirty;
mod entity;
mod storage;
mod store;

pub use change::{ChangeOrigin, ChangeStamp, PeerToken, Tick};
pub use component::{Component, ComponentTypeId};
pub use dirty::{DirtyIterator, DirtyTracker};
pub use entity::{EntityId, EntityOrigin, EntityRecord, InstanceId, NetId};
pub use storage::{ComponentStorage, ErasedStorage, Stamped};
pub use store::{ChangeSet, DespawnRecord, RemovalRecord, Store};
