use std::sync::atomic::AtomicU32;

use glam::Vec3;
use smallvec::SmallVec;

use super::PhysicsWorld;
use crate::{
    collision::{
        broadphase::BroadphaseGrid,
        contact::{CollisionPairData, ContactPair, ManifoldResult},
        narrowphase::{NarrowPhase, ShapeInstance},
        surface::SurfaceParamTable,
    },
    config::PHYSICS_CONTACT_PAIRS_MAX,
    core::{
        collider::{CollisionCallbacks, CollisionObject},
        types::{BodyFlags, BodyId, ObjectFlags, ObjectHandle, ObjectId, PairFlags},
    },
    dynamics::solver::{apply_impulse_response_to, ContactBody},
};

/// Cell count above which a single body's broadphase query is reported.
const LARGE_CELL_RANGE: i32 = 100;

/// Collision-side state of the world: broadphase, narrow phase and materials.
pub struct CollisionManager {
    pub(super) grid: Option<BroadphaseGrid>,
    pub(super) narrow_phase: Box<dyn NarrowPhase>,
    pub(super) surfaces: SurfaceParamTable,
    pub(super) num_ray_queries: AtomicU32,
}

impl CollisionManager {
    pub fn new(narrow_phase: Box<dyn NarrowPhase>) -> Self {
        Self {
            grid: None,
            narrow_phase,
            surfaces: SurfaceParamTable::new(),
            num_ray_queries: AtomicU32::new(0),
        }
    }
}

fn instance(object: &CollisionObject) -> Option<ShapeInstance<'_>> {
    object
        .shape()
        .map(|shape| ShapeInstance::new(shape, object.position(), object.orientation()))
}

impl PhysicsWorld {
    /// Broadphase query for one moving body followed by narrow-phase tests
    /// against everything in the overlapped cells.
    pub(super) fn detect_collisions_single(&mut self, id: BodyId) {
        let Some(grid) = self.collision.grid.as_ref() else {
            return;
        };
        let Some(body) = self.bodies.get_mut(id) else {
            return;
        };
        if body.is_frozen() || !body.is_can_integrate(false) {
            return;
        }

        body.update_bounding_box_transform();
        let range = grid.find_box_range(body.aabb(), self.config.box_tolerance);
        if range.width() * range.height() >= LARGE_CELL_RANGE {
            log::warn!(
                "body {id:?} at {:?} spans {}x{} grid cells",
                body.position(),
                range.width(),
                range.height()
            );
        }
        let check_dynamics = !body.has_flags(ObjectFlags::DISABLE_COLLISION_CHECK);
        let (statics, dynamics) = grid.collect_range(range);

        for handle in statics {
            if let ObjectHandle::Object(object) = handle {
                self.detect_static_vs_body_collision(object, id);
            }
        }

        if !check_dynamics {
            return;
        }
        for handle in dynamics {
            match handle {
                ObjectHandle::Body(other) if other == id => {}
                ObjectHandle::Body(other) => self.detect_body_collisions(id, other),
                ObjectHandle::Object(ghost) => self.detect_static_vs_body_collision(ghost, id),
            }
        }
    }

    /// Body-vs-body contacts, stored on `body_a`.
    pub(super) fn detect_body_collisions(&mut self, body_a: BodyId, body_b: BodyId) {
        let (Some(a), Some(b)) = (self.bodies.get(body_a), self.bodies.get(body_b)) else {
            return;
        };
        if !a.check_can_collide_with(b) {
            return;
        }

        let offset = a.aabb().center() - b.aabb().center();
        let reach = a.aabb().size().length_squared() + b.aabb().size().length_squared();
        if offset.length_squared() > reach {
            return;
        }

        // B already resolved this pair from its side.
        let mirrored = b
            .contact_pairs()
            .iter()
            .any(|pair| pair.object_a == ObjectHandle::Body(body_b) && pair.body_b == body_a);
        if mirrored {
            return;
        }

        let (Some(shape_a), Some(shape_b)) = (instance(a), instance(b)) else {
            return;
        };

        let mut manifold = ManifoldResult::new();
        self.collision
            .narrow_phase
            .collide(&shape_a, &shape_b, &|_| true, &mut manifold);
        if manifold.is_empty() {
            return;
        }

        let weight = 1.0 / manifold.len() as f32;
        let a_is_ghost = a.is_ghost();
        let mut pairs: SmallVec<[ContactPair; PHYSICS_CONTACT_PAIRS_MAX]> = SmallVec::new();
        for point in manifold.points() {
            let depth = -point.distance;
            if depth < 0.0 && !a_is_ghost {
                continue;
            }
            if pairs.len() >= PHYSICS_CONTACT_PAIRS_MAX {
                break;
            }
            pairs.push(ContactPair {
                object_a: ObjectHandle::Body(body_a),
                body_b,
                position: point.position,
                normal: point.normal,
                depth,
                dt: weight,
                restitution_a: a.restitution,
                restitution_b: b.restitution,
                friction_a: a.friction,
                friction_b: b.friction,
                flags: 0,
            });
        }

        if let Some(a) = self.bodies.get_mut(body_a) {
            for pair in pairs {
                if !a.push_contact_pair(pair) {
                    break;
                }
            }
        }
    }

    /// Static or ghost object against a body, stored on the body.
    pub(super) fn detect_static_vs_body_collision(&mut self, object: ObjectId, body: BodyId) {
        let (Some(a), Some(b)) = (self.objects.get(object), self.bodies.get(body)) else {
            return;
        };
        if !a.check_can_collide_with(b) || !a.aabb().intersects(b.aabb()) {
            return;
        }
        let (Some(shape_a), Some(shape_b)) = (instance(a), instance(b)) else {
            return;
        };

        let surfaces = &self.collision.surfaces;
        let contents = b.contents;
        let accept = |material: i32| surfaces.get(material).map_or(true, |p| p.allows_contents(contents));

        // Body first so the normals face it.
        let mut manifold = ManifoldResult::new();
        self.collision
            .narrow_phase
            .collide(&shape_b, &shape_a, &accept, &mut manifold);
        if manifold.is_empty() {
            return;
        }

        let weight = 1.0 / manifold.len() as f32;
        let mut pairs: SmallVec<[ContactPair; PHYSICS_CONTACT_PAIRS_MAX]> = SmallVec::new();
        for point in manifold.points() {
            let depth = -point.distance;
            if depth < 0.0 && !a.is_ghost() {
                continue;
            }
            if pairs.len() >= PHYSICS_CONTACT_PAIRS_MAX {
                break;
            }

            let material = if point.material >= 0 { point.material } else { a.surf_param };
            let (surf_restitution, surf_friction) = surfaces
                .get(material)
                .map_or((1.0, 1.0), |p| (p.restitution, p.friction));

            pairs.push(ContactPair {
                object_a: ObjectHandle::Object(object),
                body_b: body,
                position: point.position,
                normal: point.normal,
                depth: depth.min(1.0),
                dt: weight,
                restitution_a: surf_restitution * a.restitution,
                restitution_b: b.restitution,
                friction_a: surf_friction * a.friction,
                friction_b: b.friction,
                flags: PairFlags::OBJECTA_STATIC,
            });
        }

        if let Some(b) = self.bodies.get_mut(body) {
            for pair in pairs {
                if !b.push_contact_pair(pair) {
                    break;
                }
            }
        }
    }

    fn take_callbacks(&mut self, handle: ObjectHandle) -> Option<Box<dyn CollisionCallbacks>> {
        self.collision_object_mut(handle)?.take_callbacks()
    }

    fn restore_callbacks(&mut self, handle: ObjectHandle, callbacks: Option<Box<dyn CollisionCallbacks>>) {
        if let Some(object) = self.collision_object_mut(handle) {
            object.restore_callbacks(callbacks);
        }
    }

    /// Resolves one pair: positional correction, impulse, then callbacks and
    /// collision lists on both sides.
    pub(super) fn process_contact_pair(&mut self, mut pair: ContactPair) {
        let handle_a = pair.object_a;
        let handle_b = ObjectHandle::Body(pair.body_b);

        let mut callbacks_a = self.take_callbacks(handle_a);
        let mut callbacks_b = self.take_callbacks(handle_b);
        if let Some(cb) = callbacks_a.as_deref_mut() {
            cb.on_pre_collide(&mut pair);
        }
        if let Some(cb) = callbacks_b.as_deref_mut() {
            cb.on_pre_collide(&mut pair);
        }

        let resolved = self.resolve_pair(&mut pair);

        if let Some((flags_a, flags_b, applied_impulse, impact_velocity)) = resolved {
            let is_static = pair.flags & PairFlags::OBJECTA_STATIC != 0;

            let mut data_a = CollisionPairData {
                object_a: handle_a,
                object_b: handle_b,
                position: pair.position,
                normal: pair.normal,
                fract: pair.depth,
                applied_impulse,
                impact_velocity,
                flags: 0,
                body_index: 0,
            };
            if flags_a & ObjectFlags::DISABLE_RESPONSE != 0 || pair.flags & PairFlags::OBJECTA_NO_RESPONSE != 0 {
                data_a.flags |= PairFlags::OBJECTA_NO_RESPONSE;
            }
            if flags_b & ObjectFlags::DISABLE_RESPONSE != 0 || pair.flags & PairFlags::OBJECTB_NO_RESPONSE != 0 {
                data_a.flags |= PairFlags::OBJECTB_NO_RESPONSE;
            }

            let mut data_b = CollisionPairData {
                object_a: handle_b,
                object_b: handle_a,
                flags: 0,
                body_index: 1,
                ..data_a
            };
            if flags_b & BodyFlags::IS_CAR != 0 && !is_static {
                data_b.flags |= PairFlags::NO_SOUND;
            }
            if flags_a & ObjectFlags::DISABLE_RESPONSE != 0 || pair.flags & PairFlags::OBJECTA_NO_RESPONSE != 0 {
                data_b.flags |= PairFlags::OBJECTB_NO_RESPONSE;
            }
            if flags_b & ObjectFlags::DISABLE_RESPONSE != 0 || pair.flags & PairFlags::OBJECTB_NO_RESPONSE != 0 {
                data_b.flags |= PairFlags::OBJECTA_NO_RESPONSE;
            }

            if let Some(cb) = callbacks_a.as_deref_mut() {
                cb.on_collide(&data_a);
            }
            if let Some(object) = self.collision_object_mut(handle_a) {
                object.push_collision(data_a);
            }
            if let Some(cb) = callbacks_b.as_deref_mut() {
                cb.on_collide(&data_b);
            }
            if let Some(object) = self.collision_object_mut(handle_b) {
                object.push_collision(data_b);
            }
        }

        self.restore_callbacks(handle_a, callbacks_a);
        self.restore_callbacks(handle_b, callbacks_b);
    }

    /// Positional correction and impulse for one pair.
    ///
    /// Returns both sides' flags with the applied impulse and impact speed,
    /// or `None` when either side no longer exists.
    fn resolve_pair(&mut self, pair: &mut ContactPair) -> Option<(u32, u32, f32, f32)> {
        let erp = self.config.erp;

        if pair.flags & PairFlags::OBJECTA_STATIC != 0 {
            let ObjectHandle::Object(object_id) = pair.object_a else {
                return None;
            };
            let a = self.objects.get(object_id)?;
            let b = self.bodies.get_mut(pair.body_b)?;
            let (flags_a, flags_b) = (a.flags(), b.flags());

            let mut applied = 0.0;
            let mut impact = 0.0;
            if pair.flags & PairFlags::OBJECTB_NO_RESPONSE == 0
                && flags_a & ObjectFlags::DISABLE_RESPONSE == 0
                && pair.depth > 0.0
            {
                impact = pair.normal.dot(b.velocity_at_world_point(pair.position)).abs();

                // The solver wants the normal pointing at the static side.
                pair.normal = -pair.normal;
                pair.depth = -pair.depth;

                let combined_erp = erp + (a.erp + b.erp).max(0.0);
                let error = pair.depth * pair.dt;
                b.shift_position(pair.normal * error * combined_erp);
                applied = apply_impulse_response_to(pair, ContactBody::Static(a), b, error * combined_erp * 2.0);
            }
            return Some((flags_a, flags_b, applied, impact));
        }

        let ObjectHandle::Body(body_a) = pair.object_a else {
            return None;
        };
        let (a, b) = self.bodies.get2_mut(body_a, pair.body_b)?;
        let (flags_a, flags_b) = (a.flags(), b.flags());

        let both_cars = flags_a & BodyFlags::IS_CAR != 0 && flags_b & BodyFlags::IS_CAR != 0;
        // Car pairs swap the global ERP for their own tuning.
        let vary_erp = if both_cars { self.config.car_vs_car_erp } else { erp };
        let combined_erp = vary_erp + (a.erp + b.erp).max(0.0);

        let impact = pair
            .normal
            .dot(a.velocity_at_world_point(pair.position) - b.velocity_at_world_point(pair.position))
            .abs();

        let error = pair.depth * pair.dt;
        let correction = pair.normal * error * combined_erp;

        if pair.depth > 0.0
            && pair.flags & PairFlags::OBJECTA_NO_RESPONSE == 0
            && flags_a & (BodyFlags::FORCE_FREEZE | BodyFlags::INFINITE_MASS) == 0
            && flags_b & ObjectFlags::DISABLE_RESPONSE == 0
        {
            a.shift_position(correction);
        }
        if pair.depth > 0.0
            && pair.flags & PairFlags::OBJECTB_NO_RESPONSE == 0
            && flags_b & (BodyFlags::FORCE_FREEZE | BodyFlags::INFINITE_MASS) == 0
            && flags_a & ObjectFlags::DISABLE_RESPONSE == 0
        {
            b.shift_position(-correction);
        }

        let applied = 2.0 * apply_impulse_response_to(pair, ContactBody::Dynamic(a), b, error * combined_erp * 2.0);
        Some((flags_a, flags_b, applied, impact))
    }
}
