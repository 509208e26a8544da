//! # Core Error Types
//!
//! All errors that can occur while manipulating the store or the component
//! registry.

use thiserror::Error;

use crate::ecs::{ComponentTypeId, EntityId, NetId};

/// Errors that can occur in the store and registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Entity handle is dead or its generation is stale.
    #[error("stale or dead entity: {0}")]
    StaleEntity(EntityId),

    /// Two different Rust types claim the same wire id.
    #[error("component type id {type_id} already registered as {existing}, cannot register {incoming}")]
    DuplicateTypeId {
        /// The contested id.
        type_id: ComponentTypeId,
        /// Name of the type already registered.
        existing: String,
        /// Name of the type being registered.
        incoming: String,
    },

    /// A storage exists under this id but holds a different Rust type.
    #[error("component type id {type_id} does not hold {name}")]
    TypeMismatch {
        /// The id that was looked up.
        type_id: ComponentTypeId,
        /// Name of the requested type.
        name: String,
    },

    /// No registry entry for this wire id.
    #[error("unknown component type id {0}")]
    UnknownType(ComponentTypeId),

    /// A mirror was requested for a network id that already has an entity.
    #[error("network id already mapped: {0}")]
    NetIdInUse(NetId),

    /// Component value could not be serialized.
    #[error("failed to encode {name}: {reason}")]
    Encode {
        /// Component name.
        name: String,
        /// Serializer message.
        reason: String,
    },

    /// Component payload could not be deserialized.
    #[error("failed to decode {name}: {reason}")]
    Decode {
        /// Component name.
        name: String,
        /// Deserializer message.
        reason: String,
    },
}

/// Result type for store and registry operations.
pub type CoreResult<T> = Result<T, CoreError>;
