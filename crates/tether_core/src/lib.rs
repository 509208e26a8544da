//! # TETHER Core
//!
//! Local state for one side of a robot ↔ operator link:
//! - An entity/component [`Store`] with per-slot change stamps
//! - A dirty bitset so replication scans touch only written entities
//! - A [`ComponentRegistry`] mapping stable wire ids to typed handlers
//! - The shared robot component catalogue
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_core::{components::Position, Store};
//!
//! let mut store = Store::new();
//! let e = store.spawn_replicated();
//! store.insert(e, Position::new(0.0, 0.0, 0.0))?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod components;
pub mod ecs;
pub mod error;
pub mod registry;

pub use ecs::{
    ChangeOrigin, ChangeSet, ChangeStamp, Component, ComponentTypeId, DespawnRecord, DirtyTracker,
    EntityId, EntityOrigin, EntityRecord, InstanceId, NetId, PeerToken, RemovalRecord, Store, Tick,
};
pub use error::{CoreError, CoreResult};
pub use registry::{ComponentRegistration, ComponentRegistry};
