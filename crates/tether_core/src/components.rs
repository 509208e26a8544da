//! # Robot Components
//!
//! The component catalogue shared by robot and console. Wire ids are fixed
//! here and must never be reassigned to a different layout.
//!
//! | id | component |
//! |----|-----------|
//! | 1  | [`Name`] |
//! | 2  | [`Position`] |
//! | 3  | [`Orientation`] |
//! | 4  | [`DepthMeasurement`] |
//! | 5  | [`DepthTarget`] |
//! | 6  | [`Armed`] |
//! | 7  | [`TargetMovement`] |
//! | 8  | [`MeasuredVoltage`] |
//! | 9  | [`Leak`] |
//! | 10 | [`Robot`] |
//! | 11 | [`Surface`] |

use serde::{Deserialize, Serialize};

use crate::ecs::{Component, ComponentTypeId};
use crate::error::CoreResult;
use crate::registry::ComponentRegistry;

/// Display name of an entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

impl Name {
    /// Creates a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Component for Name {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(1);
    const NAME: &'static str = "Name";
}

/// Position in the local frame, meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns the squared distance to another position.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl Component for Position {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(2);
    const NAME: &'static str = "Position";
}

/// Attitude quaternion from the IMU.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Scalar part.
    pub w: f32,
    /// X part.
    pub x: f32,
    /// Y part.
    pub y: f32,
    /// Z part.
    pub z: f32,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Orientation {
    /// No rotation.
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

impl Component for Orientation {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(3);
    const NAME: &'static str = "Orientation";
}

/// Output of the depth sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthMeasurement {
    /// Depth below the surface, meters.
    pub depth: f32,
    /// Height above the bottom, meters.
    pub altitude: f32,
    /// Raw pressure, mbar.
    pub pressure: f32,
}

impl Component for DepthMeasurement {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(4);
    const NAME: &'static str = "DepthMeasurement";
}

/// Depth hold setpoint, meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthTarget(pub f32);

impl Component for DepthTarget {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(5);
    const NAME: &'static str = "DepthTarget";
}

/// Whether the thrusters may run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Armed {
    /// Thrusters enabled.
    Armed,
    /// Thrusters held at neutral.
    #[default]
    Disarmed,
}

impl Component for Armed {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(6);
    const NAME: &'static str = "Armed";
}

/// Commanded body-frame force (N) and torque (N·m).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMovement {
    /// Force along x, y, z.
    pub force: [f32; 3],
    /// Torque about x, y, z.
    pub torque: [f32; 3],
}

impl Component for TargetMovement {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(7);
    const NAME: &'static str = "TargetMovement";
}

/// Battery bus voltage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasuredVoltage(pub f32);

impl Component for MeasuredVoltage {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(8);
    const NAME: &'static str = "MeasuredVoltage";
}

/// Leak sensor state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leak(pub bool);

impl Component for Leak {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(9);
    const NAME: &'static str = "Leak";
}

/// Marks the entity describing the vehicle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Robot;

impl Component for Robot {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(10);
    const NAME: &'static str = "Robot";
}

/// Marks the entity describing an operator console.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface;

impl Component for Surface {
    const TYPE_ID: ComponentTypeId = ComponentTypeId(11);
    const NAME: &'static str = "Surface";
}

/// Registers the whole catalogue.
///
/// # Errors
///
/// Fails if another type already holds one of the ids.
pub fn register_components(registry: &mut ComponentRegistry) -> CoreResult<()> {
    registry
        .register::<Name>()?
        .register::<Position>()?
        .register::<Orientation>()?
        .register::<DepthMeasurement>()?
        .register::<DepthTarget>()?
        .register::<Armed>()?
        .register::<TargetMovement>()?
        .register::<MeasuredVoltage>()?
        .register::<Leak>()?
        .register::<Robot>()?
        .register::<Surface>()?;
    Ok(())
}
