//! Tuning constants and the serialisable world configuration.

use serde::{Deserialize, Serialize};

/// Gravity magnitude applied along -Y.
pub const DEFAULT_GRAVITY: f32 = 9.81;

/// Fixed interval used by [`crate::PhysicsEngine`].
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Global error reduction parameter for contact position correction.
pub const DEFAULT_ERP: f32 = 0.15;

/// Error reduction used when both sides of a contact are cars.
pub const DEFAULT_CAR_VS_CAR_ERP: f32 = 0.15;

/// Edge length of one broadphase grid cell.
pub const DEFAULT_GRID_CELL_SIZE: f32 = 24.0;

/// Half extent of the world on every axis.
pub const DEFAULT_WORLD_SIZE: f32 = 32767.0;

/// Fraction of a cell near its edge that pulls the neighbour cell into a range query.
pub const DEFAULT_BOX_TOLERANCE: f32 = 0.1;

/// Padding added to every transformed bounding box.
pub const PHYSICS_AABB_EXPAND: f32 = 0.15;

pub const PHYSICS_DEFAULT_FRICTION: f32 = 0.5;
pub const PHYSICS_DEFAULT_RESTITUTION: f32 = 0.25;
pub const PHYSICS_DEFAULT_TIRE_FRICTION: f32 = 0.2;
pub const PHYSICS_DEFAULT_TIRE_TRACTION: f32 = 1.0;

/// Fixed capacity of an object's per-step collision list.
pub const PHYSICS_COLLISION_LIST_MAX: usize = 8;

/// Fixed capacity of a body's per-step contact pairs.
pub const PHYSICS_CONTACT_PAIRS_MAX: usize = 32;

/// Fixed capacity of a narrow-phase manifold before grouping.
pub const PHYSICS_MANIFOLD_MAX: usize = 64;

/// Contacts closer than this on every axis are merged.
pub const PHYSICS_CONTACT_GROUP_DIST: f32 = 0.05;

/// Maximum number of objects in a query filter.
pub const PHYSICS_FILTER_MAX_OBJECTS: usize = 8;

/// Cells in which the closest hit was not improved before a line walk stops.
pub const PHYSICS_MAX_CLOSEST_TEST_TRIES: u32 = 2;

/// Seconds a body has to stay slow before it freezes.
pub const BODY_FREEZE_TIME: f32 = 0.5;
pub const BODY_MIN_VELOCITY: f32 = 0.08;
pub const BODY_MIN_VELOCITY_ANG: f32 = 0.08;
pub const BODY_MIN_VELOCITY_WAKE: f32 = 0.002;
pub const BODY_MIN_VELOCITY_WAKE_ANG: f32 = 0.005;
pub const BODY_MAX_VELOCITY: f32 = 16384.0;
pub const BODY_ANGULAR_DAMPING: f32 = 0.01;
pub const BODY_MIN_ANGULAR_VELOCITY_SQR: f32 = 1e-6;
pub const BODY_DEFAULT_FRICTION: f32 = 0.1;
pub const BODY_DEFAULT_RESTITUTION: f32 = 0.1;

/// Combined effective mass below which a contact is ignored.
pub const IMPULSE_DENOMINATOR_EPSILON: f32 = 1e-7;

/// Widest forward angle a hinge limit can express, in radians.
pub const MAX_HINGE_ANGLE_LIMIT: f32 = 150.0 * std::f32::consts::PI / 180.0;

/// Runtime configuration of a [`crate::PhysicsWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub erp: f32,
    pub car_vs_car_erp: f32,
    pub grid_cell_size: f32,
    pub world_size: f32,
    pub box_tolerance: f32,
    pub fixed_timestep: f32,
    pub num_iterations: u32,
    pub debug_draw_mode: i32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            erp: DEFAULT_ERP,
            car_vs_car_erp: DEFAULT_CAR_VS_CAR_ERP,
            grid_cell_size: DEFAULT_GRID_CELL_SIZE,
            world_size: DEFAULT_WORLD_SIZE,
            box_tolerance: DEFAULT_BOX_TOLERANCE,
            fixed_timestep: DEFAULT_TIME_STEP,
            num_iterations: 1,
            debug_draw_mode: 0,
        }
    }
}

impl PhysicsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_tuned_defaults() {
        let config = PhysicsConfig::from_json_str(r#"{ "erp": 0.3 }"#).expect("valid config");
        assert_eq!(config.erp, 0.3);
        assert_eq!(config.car_vs_car_erp, DEFAULT_CAR_VS_CAR_ERP);
        assert_eq!(config.grid_cell_size, DEFAULT_GRID_CELL_SIZE);
    }
}
