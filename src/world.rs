mod collision_manager;
mod debug;
mod dynamics_manager;
mod queries;

use crate::{
    collision::{
        broadphase::BroadphaseGrid,
        narrowphase::{GjkNarrowPhase, NarrowPhase},
        surface::SurfaceParamTable,
    },
    config::PhysicsConfig,
    core::{
        collider::CollisionObject,
        rigidbody::RigidBody,
        types::{BodyFlags, BodyId, ConstraintId, ControllerId, ObjectFlags, ObjectHandle, ObjectId},
    },
    dynamics::{
        constraints::Constraint,
        controller::PhysicsController,
        hinge::{HingeDesc, HingeJoint},
    },
    utils::allocator::Arena,
};

pub use collision_manager::CollisionManager;
pub use dynamics_manager::{DynamicsManager, PreIntegrationHook};

/// Owns every body, static object, ghost, constraint and controller, and
/// advances them one fixed step at a time.
///
/// Bodies are simulated only while they are on the moveable list. Statics
/// are registered in every grid cell their bounds overlap, dynamics in the
/// single cell holding their position.
pub struct PhysicsWorld {
    config: PhysicsConfig,
    bodies: Arena<RigidBody, BodyId>,
    objects: Arena<CollisionObject, ObjectId>,
    dyn_objects: Vec<BodyId>,
    moveable: Vec<BodyId>,
    static_objects: Vec<ObjectId>,
    ghost_objects: Vec<ObjectId>,
    collision: CollisionManager,
    dynamics: DynamicsManager,
    dt: f32,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        Self::with_narrow_phase(config, Box::new(GjkNarrowPhase::new()))
    }

    /// World backed by a custom collision backend.
    pub fn with_narrow_phase(config: PhysicsConfig, narrow_phase: Box<dyn NarrowPhase>) -> Self {
        Self {
            config,
            bodies: Arena::new(),
            objects: Arena::new(),
            dyn_objects: Vec::new(),
            moveable: Vec::new(),
            static_objects: Vec::new(),
            ghost_objects: Vec::new(),
            collision: CollisionManager::new(narrow_phase),
            dynamics: DynamicsManager::new(),
            dt: config.fixed_timestep,
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Grid dimensions are only read by [`init_grid`](Self::init_grid).
    pub fn config_mut(&mut self) -> &mut PhysicsConfig {
        &mut self.config
    }

    /// Duration of the last simulated step.
    pub fn last_step_time(&self) -> f32 {
        self.dt
    }

    pub fn surface_params(&self) -> &SurfaceParamTable {
        &self.collision.surfaces
    }

    pub fn surface_params_mut(&mut self) -> &mut SurfaceParamTable {
        &mut self.collision.surfaces
    }

    /// Replaces the surface table from a JSON array of definitions.
    pub fn load_surface_params_json(&mut self, json: &str) -> Result<usize, serde_json::Error> {
        let table = SurfaceParamTable::from_json_str(json)?;
        let count = table.len();
        self.collision.surfaces = table;
        log::info!("loaded {count} surface parameter(s)");
        Ok(count)
    }

    // -- grid ------------------------------------------------------------

    pub fn grid(&self) -> Option<&BroadphaseGrid> {
        self.collision.grid.as_ref()
    }

    /// Builds the broadphase grid and registers everything already in the world.
    pub fn init_grid(&mut self) {
        if self.collision.grid.is_some() {
            log::warn!("physics grid already initialized");
            return;
        }

        let grid = BroadphaseGrid::new(self.config.grid_cell_size, self.config.world_size);
        let (wide, tall) = grid.dimensions();
        log::debug!(
            "physics grid {wide}x{tall} cells of {} units",
            self.config.grid_cell_size
        );
        self.collision.grid = Some(grid);

        for id in self.dyn_objects.clone() {
            self.place_on_cell(ObjectHandle::Body(id));
        }
        for id in self.static_objects.clone() {
            self.register_static(id);
        }
        for id in self.ghost_objects.clone() {
            self.register_ghost(id);
        }
    }

    /// Drops the grid and every cell reference held by objects.
    pub fn destroy_grid(&mut self) {
        if self.collision.grid.take().is_none() {
            return;
        }
        for (_, body) in self.bodies.iter_mut() {
            body.cell = None;
            body.cell_range = None;
        }
        for (_, object) in self.objects.iter_mut() {
            object.cell = None;
            object.cell_range = None;
        }
    }

    /// Moves a dynamic object to the cell at its current position.
    fn place_on_cell(&mut self, handle: ObjectHandle) {
        let Some(grid) = self.collision.grid.as_ref() else {
            return;
        };
        let object = match handle {
            ObjectHandle::Body(id) => self.bodies.get_mut(id).map(|body| &mut body.object),
            ObjectHandle::Object(id) => self.objects.get_mut(id),
        };
        if let Some(object) = object {
            object.cell = grid.move_dynamic_object(handle, object.cell, object.position);
        }
    }

    fn unlink_from_cell(&mut self, handle: ObjectHandle) {
        let grid = self.collision.grid.as_ref();
        let object = match handle {
            ObjectHandle::Body(id) => self.bodies.get_mut(id).map(|body| &mut body.object),
            ObjectHandle::Object(id) => self.objects.get_mut(id),
        };
        let Some(object) = object else {
            return;
        };
        if let (Some(grid), Some(cell)) = (grid, object.cell) {
            grid.remove_dynamic_object(handle, cell);
        }
        object.cell = None;
    }

    fn register_static(&mut self, id: ObjectId) {
        let Some(grid) = self.collision.grid.as_ref() else {
            return;
        };
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        object.update_bounding_box_transform();
        object.cell_range =
            grid.add_static_object_to_grid(ObjectHandle::Object(id), object.aabb(), object.position);
    }

    fn unregister_static(&mut self, id: ObjectId) {
        let grid = self.collision.grid.as_ref();
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        if let (Some(grid), Some(range)) = (grid, object.cell_range) {
            grid.remove_static_object_from_grid(ObjectHandle::Object(id), range);
        }
        object.cell_range = None;
    }

    /// Mesh ghosts span cells like statics, the rest live in one cell.
    fn register_ghost(&mut self, id: ObjectId) {
        let is_mesh = self.objects.get(id).is_some_and(|object| object.mesh().is_some());
        if is_mesh {
            self.register_static(id);
        } else {
            self.place_on_cell(ObjectHandle::Object(id));
        }
    }

    // -- dynamic bodies --------------------------------------------------

    pub fn add_body(&mut self, body: RigidBody) -> BodyId {
        self.bodies.insert(body)
    }

    /// Creates a body and adds it to the world in one go.
    pub fn add_body_to_world(&mut self, body: RigidBody, moveable: bool) -> BodyId {
        let id = self.add_body(body);
        self.add_to_world(id, moveable);
        id
    }

    /// Puts an existing body into the simulation.
    pub fn add_to_world(&mut self, id: BodyId, moveable: bool) -> bool {
        let Some(body) = self.bodies.get_mut(id) else {
            log::error!("add_to_world: unknown body {id:?}");
            return false;
        };
        if self.dyn_objects.contains(&id) {
            log::warn!("add_to_world: body {id:?} already in world");
            return false;
        }

        body.mark_dirty();
        body.update_bounding_box_transform();
        self.dyn_objects.push(id);

        if moveable {
            self.add_to_moveable(id);
        } else {
            self.place_on_cell(ObjectHandle::Body(id));
        }
        true
    }

    /// Takes a body out of the simulation and hands it back.
    pub fn remove_from_world(&mut self, id: BodyId) -> Option<RigidBody> {
        if !self.dyn_objects.contains(&id) {
            log::error!("remove_from_world: body {id:?} is not in world");
            return None;
        }
        self.detach_from_world(id);
        self.bodies.remove(id)
    }

    /// Removes the body from the world and drops it; its constraints are disabled.
    pub fn destroy_body(&mut self, id: BodyId) -> bool {
        let Some(body) = self.bodies.get(id) else {
            log::error!("destroy_body: unknown body {id:?}");
            return false;
        };

        let attached = body.constraints.clone();
        for constraint_id in attached {
            let Some(constraint) = self.dynamics.constraints.get_mut(constraint_id) else {
                continue;
            };
            constraint.set_enabled(false);
            let (body0, body1) = constraint.bodies();
            let other = if body0 == id { body1 } else { body0 };
            if let Some(other) = self.bodies.get_mut(other) {
                other.detach_constraint(constraint_id);
            }
        }

        if self.dyn_objects.contains(&id) {
            self.detach_from_world(id);
        }
        self.bodies.remove(id).is_some()
    }

    fn detach_from_world(&mut self, id: BodyId) {
        self.unlink_from_cell(ObjectHandle::Body(id));
        self.dyn_objects.retain(|b| *b != id);
        self.remove_from_moveable(id);
    }

    pub fn is_valid_body(&self, id: BodyId) -> bool {
        self.bodies.contains(id) && self.dyn_objects.contains(&id)
    }

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &RigidBody)> + '_ {
        self.dyn_objects
            .iter()
            .filter_map(|id| self.bodies.get(*id).map(|body| (*id, body)))
    }

    pub fn body_count(&self) -> usize {
        self.dyn_objects.len()
    }

    /// Toggles whether a body in the world gets integrated.
    pub fn set_moveable(&mut self, id: BodyId, moveable: bool) {
        if !self.dyn_objects.contains(&id) {
            log::warn!("set_moveable: body {id:?} is not in world");
            return;
        }
        if moveable {
            self.add_to_moveable(id);
        } else {
            self.remove_from_moveable(id);
        }
    }

    pub fn is_moveable(&self, id: BodyId) -> bool {
        self.moveable.contains(&id)
    }

    fn add_to_moveable(&mut self, id: BodyId) {
        if self.moveable.contains(&id) {
            return;
        }
        let Some(body) = self.bodies.get_mut(id) else {
            return;
        };
        body.set_flags(BodyFlags::MOVEABLE);
        self.moveable.push(id);
        with_callbacks(&mut body.object, |cb| cb.on_start_move());
    }

    fn remove_from_moveable(&mut self, id: BodyId) {
        let Some(index) = self.moveable.iter().position(|b| *b == id) else {
            return;
        };
        self.moveable.swap_remove(index);
        if let Some(body) = self.bodies.get_mut(id) {
            body.clear_flags(BodyFlags::MOVEABLE);
            with_callbacks(&mut body.object, |cb| cb.on_stop_move());
        }
    }

    // -- static objects --------------------------------------------------

    pub fn add_static_object(&mut self, mut object: CollisionObject) -> ObjectId {
        object.update_bounding_box_transform();
        let id = self.objects.insert(object);
        self.static_objects.push(id);
        self.register_static(id);
        id
    }

    pub fn remove_static_object(&mut self, id: ObjectId) -> Option<CollisionObject> {
        if !self.static_objects.contains(&id) {
            log::error!("remove_static_object: {id:?} is not a static object");
            return None;
        }
        self.unregister_static(id);
        self.static_objects.retain(|o| *o != id);
        self.objects.remove(id)
    }

    pub fn destroy_static_object(&mut self, id: ObjectId) -> bool {
        self.remove_static_object(id).is_some()
    }

    pub fn is_valid_static_object(&self, id: ObjectId) -> bool {
        self.static_objects.contains(&id)
    }

    pub fn static_object_count(&self) -> usize {
        self.static_objects.len()
    }

    // -- ghost objects ---------------------------------------------------

    /// Adds a trigger volume: never responds and is invisible to rays.
    /// Without callbacks it reports through its collision list instead.
    pub fn add_ghost_object(&mut self, mut object: CollisionObject) -> ObjectId {
        object.set_flags(ObjectFlags::ISGHOST | ObjectFlags::DISABLE_RESPONSE | ObjectFlags::NO_RAYCAST);
        if !object.has_callbacks() {
            object.set_flags(ObjectFlags::COLLISIONLIST);
        }
        object.update_bounding_box_transform();

        let id = self.objects.insert(object);
        self.ghost_objects.push(id);
        self.register_ghost(id);
        id
    }

    pub fn remove_ghost_object(&mut self, id: ObjectId) -> Option<CollisionObject> {
        if !self.ghost_objects.contains(&id) {
            log::error!("remove_ghost_object: {id:?} is not a ghost object");
            return None;
        }
        self.unregister_static(id);
        self.unlink_from_cell(ObjectHandle::Object(id));
        self.ghost_objects.retain(|o| *o != id);
        self.objects.remove(id)
    }

    pub fn destroy_ghost_object(&mut self, id: ObjectId) -> bool {
        self.remove_ghost_object(id).is_some()
    }

    pub fn is_valid_ghost_object(&self, id: ObjectId) -> bool {
        self.ghost_objects.contains(&id)
    }

    /// Static or ghost object by id.
    pub fn object(&self, id: ObjectId) -> Option<&CollisionObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut CollisionObject> {
        self.objects.get_mut(id)
    }

    /// Any collidable, body or not.
    pub fn collision_object(&self, handle: ObjectHandle) -> Option<&CollisionObject> {
        match handle {
            ObjectHandle::Body(id) => self.bodies.get(id).map(|body| &body.object),
            ObjectHandle::Object(id) => self.objects.get(id),
        }
    }

    pub fn collision_object_mut(&mut self, handle: ObjectHandle) -> Option<&mut CollisionObject> {
        match handle {
            ObjectHandle::Body(id) => self.bodies.get_mut(id).map(|body| &mut body.object),
            ObjectHandle::Object(id) => self.objects.get_mut(id),
        }
    }

    // -- constraints -----------------------------------------------------

    /// Registers a constraint and links it to both of its bodies.
    pub fn add_constraint(&mut self, constraint: impl Into<Constraint>) -> ConstraintId {
        let constraint = constraint.into();
        let (body0, body1) = constraint.bodies();
        let id = self.dynamics.constraints.insert(constraint);
        self.dynamics.constraint_order.push(id);
        for body in [body0, body1] {
            if let Some(body) = self.bodies.get_mut(body) {
                body.attach_constraint(id);
            }
        }
        id
    }

    /// Builds a hinge between two bodies already in the arena.
    pub fn add_hinge_joint(&mut self, body0: BodyId, body1: BodyId, desc: &HingeDesc) -> Option<ConstraintId> {
        let Some(hinge) = HingeJoint::new(body0, body1, desc, &self.bodies) else {
            log::error!("add_hinge_joint: unknown body {body0:?} or {body1:?}");
            return None;
        };
        Some(self.add_constraint(hinge))
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let Some(constraint) = self.dynamics.constraints.remove(id) else {
            log::error!("remove_constraint: unknown constraint {id:?}");
            return None;
        };
        self.dynamics.constraint_order.retain(|c| *c != id);
        let (body0, body1) = constraint.bodies();
        for body in [body0, body1] {
            if let Some(body) = self.bodies.get_mut(body) {
                body.detach_constraint(id);
            }
        }
        Some(constraint)
    }

    pub fn destroy_constraint(&mut self, id: ConstraintId) -> bool {
        self.remove_constraint(id).is_some()
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.dynamics.constraints.get(id)
    }

    pub fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.dynamics.constraints.get_mut(id)
    }

    pub fn constraint_count(&self) -> usize {
        self.dynamics.constraints.len()
    }

    // -- controllers -----------------------------------------------------

    pub fn add_controller(&mut self, mut controller: Box<dyn PhysicsController>) -> ControllerId {
        controller.added_to_world(self);
        let id = self.dynamics.controllers.insert(Some(controller));
        self.dynamics.controller_order.push(id);
        id
    }

    pub fn remove_controller(&mut self, id: ControllerId) -> Option<Box<dyn PhysicsController>> {
        let Some(slot) = self.dynamics.controllers.remove(id) else {
            log::error!("remove_controller: unknown controller {id:?}");
            return None;
        };
        self.dynamics.controller_order.retain(|c| *c != id);
        // An empty slot means the controller is removing itself from inside `update`.
        let mut controller = slot?;
        controller.removed_from_world(self);
        Some(controller)
    }

    pub fn destroy_controller(&mut self, id: ControllerId) -> bool {
        self.remove_controller(id).is_some()
    }

    pub fn controller_count(&self) -> usize {
        self.dynamics.controllers.len()
    }
}

/// Runs `f` on the object's callbacks, if any.
pub(crate) fn with_callbacks(
    object: &mut CollisionObject,
    f: impl FnOnce(&mut dyn crate::core::collider::CollisionCallbacks),
) {
    if let Some(callbacks) = object.callbacks.as_deref_mut() {
        f(callbacks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn sphere_body(position: Vec3) -> RigidBody {
        let mut body = RigidBody::new();
        assert!(body.initialize_sphere(0.5));
        body.set_mass(1.0);
        body.set_position(position);
        body
    }

    #[test]
    fn world_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PhysicsWorld>();
    }

    #[test]
    fn bodies_are_placed_once_the_grid_exists() {
        let mut world = PhysicsWorld::default();
        let id = world.add_body_to_world(sphere_body(Vec3::new(5.0, 0.0, 5.0)), false);
        assert!(world.body(id).and_then(|b| b.cell()).is_none());

        world.init_grid();
        assert!(world.body(id).and_then(|b| b.cell()).is_some());
        assert!(!world.is_moveable(id));

        world.destroy_grid();
        assert!(world.body(id).and_then(|b| b.cell()).is_none());
    }

    #[test]
    fn moveable_flag_follows_the_list() {
        let mut world = PhysicsWorld::default();
        world.init_grid();
        let id = world.add_body_to_world(sphere_body(Vec3::ZERO), true);
        assert!(world.body(id).is_some_and(|b| b.has_flags(BodyFlags::MOVEABLE)));

        world.set_moveable(id, false);
        assert!(!world.is_moveable(id));
        assert!(!world.body(id).is_some_and(|b| b.has_flags(BodyFlags::MOVEABLE)));
    }

    #[test]
    fn removing_twice_fails() {
        let mut world = PhysicsWorld::default();
        world.init_grid();
        let id = world.add_body_to_world(sphere_body(Vec3::ZERO), true);
        assert!(world.is_valid_body(id));
        assert!(world.remove_from_world(id).is_some());
        assert!(world.remove_from_world(id).is_none());
        assert!(!world.is_valid_body(id));
        assert!(!world.destroy_body(id));
    }

    #[test]
    fn ghosts_get_trigger_flags() {
        let mut world = PhysicsWorld::default();
        world.init_grid();
        let mut ghost = CollisionObject::new();
        assert!(ghost.initialize_sphere(1.0));
        let id = world.add_ghost_object(ghost);

        let ghost = world.object(id).expect("ghost registered");
        assert!(ghost.is_ghost());
        assert!(ghost.has_flags(ObjectFlags::NO_RAYCAST | ObjectFlags::DISABLE_RESPONSE));
        assert!(ghost.has_flags(ObjectFlags::COLLISIONLIST));
        assert!(ghost.cell().is_some());

        assert!(world.destroy_ghost_object(id));
        assert!(!world.is_valid_ghost_object(id));
    }
}
