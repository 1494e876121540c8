use std::sync::atomic::Ordering;

use super::{with_callbacks, PhysicsWorld};
use crate::{
    core::types::{BodyId, ConstraintId, ControllerId, ObjectHandle},
    dynamics::{constraints::Constraint, controller::PhysicsController},
    utils::{allocator::Arena, logging::ScopedTimer},
};

/// Called once per sub-step after integration and before collision detection,
/// with the step duration and the sub-step index.
pub type PreIntegrationHook<'a> = &'a mut dyn FnMut(&mut PhysicsWorld, f32, u32);

/// Dynamics-side state of the world: constraints and controllers in
/// registration order.
pub struct DynamicsManager {
    pub(super) constraints: Arena<Constraint, ConstraintId>,
    pub(super) constraint_order: Vec<ConstraintId>,
    /// A slot is `None` while its controller is being updated.
    pub(super) controllers: Arena<Option<Box<dyn PhysicsController>>, ControllerId>,
    pub(super) controller_order: Vec<ControllerId>,
}

impl Default for DynamicsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicsManager {
    pub fn new() -> Self {
        Self {
            constraints: Arena::new(),
            constraint_order: Vec::new(),
            controllers: Arena::new(),
            controller_order: Vec::new(),
        }
    }
}

impl PhysicsWorld {
    /// Advances the world by one step of `dt` seconds.
    ///
    /// `iteration` is the sub-step index within the current frame and is
    /// only passed through to the hook. Does nothing until
    /// [`init_grid`](Self::init_grid) has been called.
    pub fn simulate_step(&mut self, dt: f32, iteration: u32, pre_integration: Option<PreIntegrationHook<'_>>) {
        if self.collision.grid.is_none() {
            return;
        }
        let _timer = ScopedTimer::new("physics::simulate_step");
        self.dt = dt;

        {
            let _timer = ScopedTimer::new("physics::constraints_prepare");
            self.prepare_constraints(dt);
        }
        {
            let _timer = ScopedTimer::new("physics::controllers");
            self.update_controllers(dt);
        }

        let mut moving = Vec::with_capacity(self.moveable.len());
        {
            let _timer = ScopedTimer::new("physics::integrate");
            for id in self.ghost_objects.clone() {
                if let Some(ghost) = self.objects.get_mut(id) {
                    ghost.clear_collision_list();
                }
            }
            for id in self.moveable.clone() {
                let Some(body) = self.bodies.get_mut(id) else {
                    continue;
                };
                with_callbacks(&mut body.object, |cb| cb.pre_simulate(dt));
                body.clear_contacts();

                self.integrate_single(id, dt);
                if self.bodies.get(id).is_some_and(|body| !body.is_frozen()) {
                    moving.push(id);
                }
            }
        }

        if let Some(hook) = pre_integration {
            hook(self, dt, iteration);
        }

        {
            let _timer = ScopedTimer::new("physics::detect");
            for &id in &moving {
                self.detect_collisions_single(id);
            }
        }

        for &id in &moving {
            if let Some(body) = self.bodies.get_mut(id) {
                body.update(dt);
            }
        }

        {
            let _timer = ScopedTimer::new("physics::contacts");
            for &id in &moving {
                let Some(body) = self.bodies.get(id) else {
                    continue;
                };
                let pairs = body.contact_pairs.clone();
                for pair in pairs {
                    self.process_contact_pair(pair);
                }
                if let Some(body) = self.bodies.get_mut(id) {
                    with_callbacks(&mut body.object, |cb| cb.post_simulate(dt));
                }
            }
        }

        {
            let _timer = ScopedTimer::new("physics::constraints_apply");
            self.apply_constraints(dt);
        }

        *self.collision.num_ray_queries.get_mut() = 0;
    }

    /// Integrates one body and re-homes it in the grid when it moved.
    fn integrate_single(&mut self, id: BodyId, dt: f32) {
        let Some(body) = self.bodies.get_mut(id) else {
            return;
        };
        let old_cell = body.cell;
        body.integrate(dt);

        let frozen = body.is_frozen();
        let needs_cell = (!frozen && body.is_can_integrate(true)) || (old_cell.is_none() && frozen);
        if !needs_cell {
            return;
        }
        if let Some(grid) = self.collision.grid.as_ref() {
            body.object.cell = grid.move_dynamic_object(ObjectHandle::Body(id), old_cell, body.object.position);
        }
    }

    fn prepare_constraints(&mut self, dt: f32) {
        for &id in &self.dynamics.constraint_order {
            if let Some(constraint) = self.dynamics.constraints.get_mut(id) {
                if constraint.is_enabled() {
                    constraint.pre_apply(dt, &self.bodies);
                }
            }
        }
    }

    /// Hinge damping first, then user controllers. Each controller is taken
    /// out of its slot while it runs so it can borrow the whole world.
    fn update_controllers(&mut self, dt: f32) {
        for &id in &self.dynamics.constraint_order {
            if let Some(constraint) = self.dynamics.constraints.get_mut(id) {
                if constraint.is_enabled() {
                    constraint.update(dt, &mut self.bodies);
                }
            }
        }

        for id in self.dynamics.controller_order.clone() {
            let Some(mut controller) = self.dynamics.controllers.get_mut(id).and_then(Option::take) else {
                continue;
            };
            if controller.is_enabled() {
                controller.update(dt, self);
            }
            match self.dynamics.controllers.get_mut(id) {
                Some(slot) => *slot = Some(controller),
                None => controller.removed_from_world(self),
            }
        }
    }

    fn apply_constraints(&mut self, dt: f32) {
        let mut touched = Vec::new();
        for id in self.dynamics.constraint_order.clone() {
            let Some(constraint) = self.dynamics.constraints.get_mut(id) else {
                continue;
            };
            if !constraint.is_enabled() {
                continue;
            }

            touched.clear();
            if !constraint.apply(dt, &mut self.bodies, &mut touched) {
                continue;
            }

            // Everything attached to a body this constraint moved must run again.
            for &body_id in &touched {
                let Some(body) = self.bodies.get_mut(body_id) else {
                    continue;
                };
                body.try_wake(false);
                for &other in &body.constraints {
                    if other == id {
                        continue;
                    }
                    if let Some(other) = self.dynamics.constraints.get_mut(other) {
                        other.set_unsatisfied();
                    }
                }
            }
        }
    }

    /// Number of single-object line tests since the last step.
    pub fn num_ray_queries(&self) -> u32 {
        self.collision.num_ray_queries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{collider::CollisionCallbacks, rigidbody::RigidBody},
        PhysicsConfig,
    };
    use glam::Vec3;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    struct Counter {
        calls: Arc<AtomicU32>,
    }

    impl PhysicsController for Counter {
        fn update(&mut self, _dt: f32, world: &mut PhysicsWorld) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(world.controller_count(), 1);
        }
    }

    struct StepCallbacks {
        pre: Arc<AtomicU32>,
        post: Arc<AtomicU32>,
    }

    impl CollisionCallbacks for StepCallbacks {
        fn pre_simulate(&mut self, _dt: f32) {
            self.pre.fetch_add(1, Ordering::SeqCst);
        }

        fn post_simulate(&mut self, _dt: f32) {
            self.post.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn falling_body() -> RigidBody {
        let mut body = RigidBody::new();
        assert!(body.initialize_sphere(0.5));
        body.set_mass(1.0);
        body.set_position(Vec3::new(0.0, 10.0, 0.0));
        body
    }

    #[test]
    fn world_without_grid_is_inert() {
        let mut world = PhysicsWorld::new(PhysicsConfig::default());
        let id = world.add_body_to_world(falling_body(), true);
        world.simulate_step(1.0 / 60.0, 0, None);
        assert_eq!(world.body(id).map(|b| b.position()), Some(Vec3::new(0.0, 10.0, 0.0)));
    }

    #[test]
    fn controllers_and_hook_run_every_step() {
        let mut world = PhysicsWorld::default();
        world.init_grid();

        let calls = Arc::new(AtomicU32::new(0));
        let controller = world.add_controller(Box::new(Counter { calls: calls.clone() }));

        let mut hook_steps = Vec::new();
        for i in 0..3 {
            world.simulate_step(1.0 / 60.0, i, Some(&mut |_: &mut PhysicsWorld, _dt: f32, iteration: u32| {
                hook_steps.push(iteration)
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(hook_steps, vec![0, 1, 2]);

        assert!(world.destroy_controller(controller));
        world.simulate_step(1.0 / 60.0, 0, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn step_callbacks_bracket_the_body_step() {
        let mut world = PhysicsWorld::default();
        world.init_grid();

        let pre = Arc::new(AtomicU32::new(0));
        let post = Arc::new(AtomicU32::new(0));
        let mut body = falling_body();
        body.set_callbacks(Some(Box::new(StepCallbacks {
            pre: pre.clone(),
            post: post.clone(),
        })));
        let id = world.add_body_to_world(body, true);

        world.simulate_step(1.0 / 60.0, 0, None);
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
        assert!(world.body(id).is_some_and(|b| b.position().y < 10.0));
        assert_eq!(world.num_ray_queries(), 0);
    }
}
