//! # Component System
//!
//! Components are pure data containers with no behavior. Each component type
//! carries a stable wire identifier so that robot and console agree on what a
//! payload means without any runtime type inspection.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stable identifier of a component type on the wire.
///
/// Assigned once per schema and never reused for an incompatible layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeId(pub u16);

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker trait for store components.
///
/// Components must be:
/// - `Clone`: snapshots copy the current value
/// - `Serialize + DeserializeOwned`: payloads cross the wire
/// - `Send + Sync + 'static`: the store may be handed between threads
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// struct Depth(f32);
///
/// impl Component for Depth {
///     const TYPE_ID: ComponentTypeId = ComponentTypeId(40);
///     const NAME: &'static str = "Depth";
/// }
/// ```
pub trait Component: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable wire identifier for this component type.
    const TYPE_ID: ComponentTypeId;

    /// Human-readable name used in diagnostics.
    const NAME: &'static str;
}
