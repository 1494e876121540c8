//! eq_physics – rigid-body physics core.
//!
//! A [`PhysicsWorld`] owns rigid bodies, static and ghost collision objects,
//! constraints and controllers. Bodies are sorted into a sparse grid on the
//! XZ plane, contacts are resolved with impulses plus positional correction,
//! and the same grid answers line and convex-sweep queries. [`PhysicsEngine`]
//! drives a world at a fixed timestep.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod utils;
pub mod world;

pub use glam::{Mat3, Mat4, Quat, Vec3};

pub use collision::{
    broadphase::BroadphaseGrid,
    narrowphase::{GjkNarrowPhase, NarrowPhase},
    queries::{CollisionFilter, CollisionInfo, FilterFlags, FilterType},
    surface::{SurfaceParam, SurfaceParamTable},
    contact::{CollisionPairData, ContactPair},
};
pub use config::PhysicsConfig;
pub use core::{
    collider::{CollisionCallbacks, CollisionObject, CollisionShape},
    mesh::TriangleMesh,
    rigidbody::RigidBody,
    types::{Aabb, BodyFlags, BodyId, ConstraintId, ControllerId, ObjectFlags, ObjectHandle, ObjectId, PairFlags},
};
pub use dynamics::{
    constraints::{Constraint, ConstraintFlags, MaxDistanceConstraint, PointConstraint},
    controller::PhysicsController,
    hinge::{HingeDesc, HingeJoint},
};
pub use utils::{
    allocator::{Arena, EntityId},
    debug::{DebugColor, DebugDraw, NullDebugDraw},
};
pub use world::{PhysicsWorld, PreIntegrationHook};

use config::DEFAULT_TIME_STEP;
use utils::logging::warn_if_steps_dropped;

/// Most intervals one frame may owe before the backlog is dropped.
const MAX_PENDING_INTERVALS: f32 = 8.0;

/// High-level convenience wrapper that owns a [`PhysicsWorld`] and steps it
/// at `fixed_timestep`, split into `num_iterations` sub-steps.
pub struct PhysicsEngine {
    world: PhysicsWorld,
    accumulator: f32,
}

impl Default for PhysicsEngine {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl PhysicsEngine {
    /// Creates the world and its grid.
    pub fn new(config: PhysicsConfig) -> Self {
        let mut world = PhysicsWorld::new(config);
        world.init_grid();
        Self::with_world(world)
    }

    /// Wraps a prepared world; call [`PhysicsWorld::init_grid`] before stepping.
    pub fn with_world(world: PhysicsWorld) -> Self {
        Self {
            world,
            accumulator: 0.0,
        }
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn into_world(self) -> PhysicsWorld {
        self.world
    }

    /// Time carried over to the next frame.
    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    /// Advances by `frame_dt` seconds; returns how many intervals ran.
    pub fn step(&mut self, frame_dt: f32) -> u32 {
        self.run(frame_dt, None)
    }

    /// Like [`step`](Self::step), calling `hook` between integration and
    /// collision detection of every sub-step.
    pub fn step_with_hook(&mut self, frame_dt: f32, mut hook: impl FnMut(&mut PhysicsWorld, f32, u32)) -> u32 {
        self.run(frame_dt, Some(&mut hook))
    }

    fn run(&mut self, frame_dt: f32, mut hook: Option<&mut dyn FnMut(&mut PhysicsWorld, f32, u32)>) -> u32 {
        if !frame_dt.is_finite() || frame_dt <= 0.0 {
            return 0;
        }

        let config = *self.world.config();
        let interval = if config.fixed_timestep > 0.0 {
            config.fixed_timestep
        } else {
            DEFAULT_TIME_STEP
        };
        let iterations = config.num_iterations.max(1);
        let sub_dt = interval / iterations as f32;

        self.accumulator += frame_dt;
        let max_pending = interval * MAX_PENDING_INTERVALS;
        if self.accumulator > max_pending {
            let dropped = ((self.accumulator - max_pending) / interval) as u32;
            warn_if_steps_dropped(dropped, interval);
            self.accumulator = max_pending;
        }

        // Tolerate rounding so a clamped backlog still runs every interval.
        let intervals = (self.accumulator / interval + 1e-4).floor() as u32;
        self.accumulator = (self.accumulator - intervals as f32 * interval).max(0.0);

        for _ in 0..intervals {
            for i in 0..iterations {
                match hook.as_mut() {
                    Some(hook) => self.world.simulate_step(sub_dt, i, Some(&mut **hook)),
                    None => self.world.simulate_step(sub_dt, i, None),
                }
            }
        }
        intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accumulator_runs_whole_intervals_only() {
        let mut engine = PhysicsEngine::default();
        let interval = engine.world().config().fixed_timestep;

        assert_eq!(engine.step(interval * 0.5), 0);
        assert_eq!(engine.step(interval * 0.75), 1);
        assert_relative_eq!(engine.accumulator(), interval * 0.25, epsilon = 1e-6);
    }

    #[test]
    fn long_frames_are_clamped() {
        let mut engine = PhysicsEngine::default();
        assert_eq!(engine.step(10.0), 8);
        assert!(engine.accumulator() < engine.world().config().fixed_timestep);
    }

    #[test]
    fn hook_sees_every_sub_step() {
        let config = PhysicsConfig {
            num_iterations: 3,
            ..PhysicsConfig::default()
        };
        let mut engine = PhysicsEngine::new(config);
        let mut seen = Vec::new();
        engine.step_with_hook(config.fixed_timestep, |_, dt, i| seen.push((dt, i)));

        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().map(|(_, i)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_relative_eq!(seen[0].0, config.fixed_timestep / 3.0);
    }

    #[test]
    fn hook_is_reused_across_intervals() {
        let config = PhysicsConfig {
            num_iterations: 2,
            ..PhysicsConfig::default()
        };
        let mut engine = PhysicsEngine::new(config);
        let mut calls = 0;
        let intervals = engine.step_with_hook(config.fixed_timestep * 3.0, |_, _, _| calls += 1);

        assert_eq!(intervals, 3);
        assert_eq!(calls, 6);
    }
}
