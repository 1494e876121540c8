use std::ops::{Deref, DerefMut};

use glam::{Mat3, Quat, Vec3};
use smallvec::SmallVec;

use super::{
    collider::CollisionObject,
    types::{BodyFlags, ConstraintId, ObjectFlags},
};
use crate::{
    collision::{contact::ContactPair, shapes::ShapeUtil},
    config::{
        BODY_ANGULAR_DAMPING, BODY_FREEZE_TIME, BODY_MAX_VELOCITY, BODY_MIN_ANGULAR_VELOCITY_SQR,
        BODY_MIN_VELOCITY, BODY_MIN_VELOCITY_ANG, BODY_MIN_VELOCITY_WAKE,
        BODY_MIN_VELOCITY_WAKE_ANG, DEFAULT_GRAVITY, PHYSICS_CONTACT_PAIRS_MAX,
    },
    utils::math,
};

/// Maximum constraints tracked inline per body before spilling.
pub const BODY_INLINE_CONSTRAINTS: usize = 8;

/// Dynamic collision object with mass, velocity and sleep state.
pub struct RigidBody {
    pub object: CollisionObject,
    mass: f32,
    inv_mass: f32,
    inertia: Vec3,
    inv_inertia: Vec3,
    inv_inertia_tensor: Mat3,
    center_of_mass: Vec3,
    center_of_mass_trans: Vec3,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    linear_factor: Vec3,
    angular_factor: Vec3,
    total_force: Vec3,
    total_torque: Vec3,
    freeze_time: f32,
    min_frame_time: f32,
    frame_time_accumulator: f32,
    min_frame_time_ignore_motion: bool,
    last_frame_time: f32,
    prev_position: Vec3,
    prev_orientation: Quat,
    gravity: f32,
    pub(crate) constraints: SmallVec<[ConstraintId; BODY_INLINE_CONSTRAINTS]>,
    pub(crate) contact_pairs: SmallVec<[ContactPair; PHYSICS_CONTACT_PAIRS_MAX]>,
}

impl Deref for RigidBody {
    type Target = CollisionObject;

    fn deref(&self) -> &CollisionObject {
        &self.object
    }
}

impl DerefMut for RigidBody {
    fn deref_mut(&mut self) -> &mut CollisionObject {
        &mut self.object
    }
}

impl Default for RigidBody {
    fn default() -> Self {
        Self::new()
    }
}

impl RigidBody {
    pub fn new() -> Self {
        Self::from_object(CollisionObject::new())
    }

    /// Wraps an initialized collision object.
    pub fn from_object(object: CollisionObject) -> Self {
        let position = object.position();
        let orientation = object.orientation();
        Self {
            object,
            mass: 0.0,
            inv_mass: 0.0,
            inertia: Vec3::ZERO,
            inv_inertia: Vec3::ZERO,
            inv_inertia_tensor: Mat3::ZERO,
            center_of_mass: Vec3::ZERO,
            center_of_mass_trans: Vec3::ZERO,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
            total_force: Vec3::ZERO,
            total_torque: Vec3::ZERO,
            freeze_time: BODY_FREEZE_TIME,
            min_frame_time: 0.0,
            frame_time_accumulator: 0.0,
            min_frame_time_ignore_motion: false,
            last_frame_time: 0.0,
            prev_position: position,
            prev_orientation: orientation,
            gravity: DEFAULT_GRAVITY,
            constraints: SmallVec::new(),
            contact_pairs: SmallVec::new(),
        }
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    pub fn set_mass(&mut self, mass: f32) {
        self.set_mass_scaled(mass, 1.0);
    }

    /// Sets the mass and recomputes inertia from the shape, scaled by `inertia_scale`.
    pub fn set_mass_scaled(&mut self, mass: f32, inertia_scale: f32) {
        self.mass = mass;
        self.inv_mass = if mass > 0.0 { 1.0 / mass } else { 0.0 };
        self.compute_inertia(inertia_scale);
    }

    pub fn compute_inertia(&mut self, scale: f32) {
        self.inertia = match self.object.shape() {
            Some(shape) => ShapeUtil::local_inertia(shape, self.mass * scale),
            None => {
                log::warn!("RigidBody::compute_inertia - body has no shape, inertia left at zero");
                Vec3::ZERO
            }
        };
        self.inv_inertia = math::safe_recip(self.inertia);
        self.update_inertia_tensor();
    }

    pub fn local_inertia(&self) -> Vec3 {
        self.inertia
    }

    pub fn inv_inertia(&self) -> Vec3 {
        self.inv_inertia
    }

    pub fn world_inv_inertia_tensor(&self) -> Mat3 {
        self.inv_inertia_tensor
    }

    pub fn update_inertia_tensor(&mut self) {
        let orientation = self.object.orientation;
        self.center_of_mass_trans = orientation * self.center_of_mass;
        self.inv_inertia_tensor = math::rotate_diagonal_tensor(self.inv_inertia, orientation);
    }

    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn set_center_of_mass(&mut self, center: Vec3) {
        self.center_of_mass = center;
        self.update_inertia_tensor();
    }

    /// World-space center of mass.
    pub fn world_center_of_mass(&self) -> Vec3 {
        self.object.position + self.center_of_mass_trans
    }

    pub fn gravity(&self) -> f32 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: f32) {
        self.gravity = gravity;
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    pub fn set_linear_factor(&mut self, factor: Vec3) {
        self.linear_factor = factor;
    }

    pub fn set_angular_factor(&mut self, factor: Vec3) {
        self.angular_factor = factor;
    }

    pub fn prev_position(&self) -> Vec3 {
        self.prev_position
    }

    pub fn prev_orientation(&self) -> Quat {
        self.prev_orientation
    }

    /// Teleports the body; the previous position is reset so no velocity is derived.
    pub fn set_position(&mut self, position: Vec3) {
        self.prev_position = position;
        self.object.set_position(position);
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.prev_orientation = orientation;
        self.object.set_orientation(orientation);
        self.update_inertia_tensor();
    }

    /// Moves the current and previous positions together, keeping the derived velocity.
    pub(crate) fn shift_position(&mut self, offset: Vec3) {
        self.object.position += offset;
        self.prev_position += offset;
        self.object.mark_dirty();
    }

    pub fn total_force(&self) -> Vec3 {
        self.total_force
    }

    pub fn total_torque(&self) -> Vec3 {
        self.total_torque
    }

    pub fn last_frame_time(&self) -> f32 {
        self.last_frame_time
    }

    pub fn min_frame_time(&self) -> f32 {
        self.min_frame_time
    }

    pub fn accum_delta_time(&self) -> f32 {
        self.frame_time_accumulator
    }

    pub fn set_min_frame_time(&mut self, time: f32, ignore_motion: bool) {
        if self.min_frame_time != time || self.min_frame_time_ignore_motion != ignore_motion {
            self.frame_time_accumulator = 0.0;
        }
        self.min_frame_time = time;
        self.min_frame_time_ignore_motion = ignore_motion;
    }

    pub fn is_can_integrate(&self, check_ignore: bool) -> bool {
        self.frame_time_accumulator == 0.0 || check_ignore == self.min_frame_time_ignore_motion
    }

    pub fn is_frozen(&self) -> bool {
        self.object.flags & (BodyFlags::FROZEN | BodyFlags::FORCE_FREEZE) != 0
    }

    /// Clears `FROZEN` unless force-frozen or, with `velocity_check`, barely moving.
    pub fn try_wake(&mut self, velocity_check: bool) -> bool {
        if self.object.flags & BodyFlags::FORCE_FREEZE != 0 {
            return false;
        }

        if velocity_check
            && self.linear_velocity.length_squared() < BODY_MIN_VELOCITY_WAKE
            && self.angular_velocity.length_squared() < BODY_MIN_VELOCITY_WAKE_ANG
        {
            return false;
        }

        self.object.flags &= !BodyFlags::FROZEN;
        self.freeze_time = BODY_FREEZE_TIME;
        true
    }

    pub fn wake(&mut self) {
        self.object.flags &= !(BodyFlags::FROZEN | BodyFlags::FORCE_FREEZE);
        self.freeze_time = BODY_FREEZE_TIME;
    }

    pub fn freeze(&mut self) {
        self.object.flags |= BodyFlags::FROZEN | BodyFlags::FORCE_FREEZE;
    }

    /// Advances the body by one world step, honouring the minimum frame time.
    pub fn integrate(&mut self, dt: f32) {
        if self.is_frozen() {
            if self.object.flags & BodyFlags::PRESERVE_FORCES == 0 {
                self.total_force = Vec3::ZERO;
                self.total_torque = Vec3::ZERO;
                self.linear_velocity = Vec3::ZERO;
                self.angular_velocity = Vec3::ZERO;
            }
            return;
        }

        if self.mass <= 0.0 {
            return;
        }

        let mut accumulator = self.frame_time_accumulator;
        let ignore_motion = self.min_frame_time_ignore_motion;

        if accumulator < self.min_frame_time {
            accumulator += dt;
            if !ignore_motion {
                self.frame_time_accumulator = accumulator;
                return;
            }
        } else if ignore_motion {
            accumulator = 0.0;
        }

        if ignore_motion {
            self.last_frame_time = dt;
        } else {
            self.last_frame_time = accumulator + dt;
            accumulator = 0.0;
        }
        self.frame_time_accumulator = accumulator;

        self.prev_position = self.object.position;
        self.prev_orientation = self.object.orientation;

        self.accumulate_forces(self.last_frame_time);
    }

    pub fn accumulate_forces(&mut self, dt: f32) {
        let mut linear = self.linear_velocity;
        let mut angular = self.angular_velocity;
        let flags = self.object.flags;

        if flags & BodyFlags::NO_AUTO_FREEZE == 0 {
            if linear.length_squared() < BODY_MIN_VELOCITY
                && angular.length_squared() < BODY_MIN_VELOCITY_ANG
            {
                self.freeze_time -= dt;
                if self.freeze_time < 0.0 {
                    self.object.flags |= BodyFlags::FROZEN;
                }
            } else {
                self.freeze_time = BODY_FREEZE_TIME;
            }
        }

        linear += Vec3::new(0.0, -self.gravity, 0.0) * dt;
        linear += self.total_force * self.inv_mass * dt;

        linear = linear.clamp(Vec3::splat(-BODY_MAX_VELOCITY), Vec3::splat(BODY_MAX_VELOCITY));
        angular = angular.clamp(Vec3::splat(-BODY_MAX_VELOCITY), Vec3::splat(BODY_MAX_VELOCITY));

        angular += (self.inv_inertia_tensor * self.total_torque) * dt;

        if angular.length_squared() < BODY_MIN_ANGULAR_VELOCITY_SQR {
            angular = Vec3::ZERO;
        }

        if flags & BodyFlags::DISABLE_DAMPING == 0 {
            let scale = 1.0 - BODY_ANGULAR_DAMPING * dt;
            angular = if scale > 0.0 { angular * scale } else { Vec3::ZERO };
        }

        let spin = math::angular_velocity_spin(angular * self.angular_factor, self.object.orientation);
        self.object.orientation = (self.object.orientation + spin * dt).normalize();
        self.object.position += linear * self.linear_factor * dt;

        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self.total_force = Vec3::ZERO;
        self.total_torque = Vec3::ZERO;

        self.object.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
        self.update_inertia_tensor();
    }

    /// Re-derives velocities from the displacement of this step and refreshes the bounds.
    pub fn update(&mut self, dt: f32) {
        if dt > 0.0 {
            self.linear_velocity = (self.object.position - self.prev_position) / dt;
            self.angular_velocity =
                math::angular_velocity_between(self.prev_orientation, self.object.orientation, dt);
        }
        self.object.update_bounding_box_transform();
    }

    /// Lever arm from the center of mass to a world point.
    pub fn lever_arm(&self, world_point: Vec3) -> Vec3 {
        world_point - self.world_center_of_mass()
    }

    /// Impulse at an offset relative to the center of mass.
    pub fn apply_impulse(&mut self, rel_pos: Vec3, impulse: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia_tensor * rel_pos.cross(impulse);
    }

    pub fn apply_world_impulse(&mut self, position: Vec3, impulse: Vec3) {
        let rel = self.lever_arm(position);
        self.apply_impulse(rel, impulse);
    }

    pub fn apply_force(&mut self, rel_pos: Vec3, force: Vec3) {
        self.total_force += force;
        self.total_torque += rel_pos.cross(force);
    }

    pub fn apply_world_force(&mut self, position: Vec3, force: Vec3) {
        let rel = self.lever_arm(position);
        self.apply_force(rel, force);
    }

    pub fn apply_linear_impulse(&mut self, impulse: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
    }

    pub fn apply_angular_impulse(&mut self, impulse: Vec3) {
        self.angular_velocity += self.inv_inertia_tensor * impulse;
    }

    pub fn apply_linear_force(&mut self, force: Vec3) {
        self.total_force += force;
    }

    pub fn apply_angular_force(&mut self, torque: Vec3) {
        self.total_torque += torque;
    }

    pub fn velocity_at_local_point(&self, rel_pos: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(rel_pos)
    }

    pub fn velocity_at_world_point(&self, point: Vec3) -> Vec3 {
        self.velocity_at_local_point(self.lever_arm(point))
    }

    /// Inverse effective mass along `normal` at lever arm `rel_pos`.
    pub fn compute_impulse_denominator(&self, rel_pos: Vec3, normal: Vec3) -> f32 {
        let c = rel_pos.cross(normal);
        let vec = (self.inv_inertia_tensor * c).cross(rel_pos);
        self.inv_mass + normal.dot(vec)
    }

    pub fn constraints(&self) -> &[ConstraintId] {
        &self.constraints
    }

    pub fn contact_pairs(&self) -> &[ContactPair] {
        &self.contact_pairs
    }

    /// Clears both the contact pairs and the collision list.
    pub fn clear_contacts(&mut self) {
        self.contact_pairs.clear();
        self.object.clear_collision_list();
    }

    /// Adds a pair unless the per-step capacity is reached.
    pub(crate) fn push_contact_pair(&mut self, pair: ContactPair) -> bool {
        if self.contact_pairs.len() >= PHYSICS_CONTACT_PAIRS_MAX {
            return false;
        }
        self.contact_pairs.push(pair);
        true
    }

    pub(crate) fn attach_constraint(&mut self, id: ConstraintId) {
        if !self.constraints.contains(&id) {
            self.constraints.push(id);
        }
    }

    pub(crate) fn detach_constraint(&mut self, id: ConstraintId) {
        if let Some(index) = self.constraints.iter().position(|c| *c == id) {
            self.constraints.swap_remove(index);
        }
    }
}

/// Coulomb friction impulse opposing the tangential part of `velocity`.
pub fn compute_friction_velocity(
    normal: Vec3,
    velocity: Vec3,
    normal_impulse: f32,
    denominator: f32,
    static_friction: f32,
    dynamic_friction: f32,
) -> Vec3 {
    let tangent_velocity = velocity - velocity.dot(normal) * normal;
    let tangent_speed = tangent_velocity.length();

    if tangent_speed > 0.0 && denominator > 0.0 {
        let tangent = -tangent_velocity / tangent_speed;
        let impulse_to_reverse = tangent_speed / denominator;
        let impulse_from_normal = static_friction * normal_impulse;

        let friction = if impulse_to_reverse < impulse_from_normal {
            impulse_to_reverse
        } else {
            dynamic_friction * normal_impulse
        };
        return tangent * friction;
    }

    Vec3::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_sphere() -> RigidBody {
        let mut object = CollisionObject::new();
        object.initialize_sphere(0.5);
        let mut body = RigidBody::from_object(object);
        body.set_mass(1.0);
        body
    }

    #[test]
    fn zero_mass_has_zero_inverse() {
        let mut body = unit_sphere();
        body.set_mass(0.0);
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.inv_inertia(), Vec3::ZERO);
    }

    #[test]
    fn min_frame_time_accumulates_before_stepping() {
        let mut body = unit_sphere();
        body.set_min_frame_time(0.05, false);

        body.integrate(0.02);
        assert_relative_eq!(body.accum_delta_time(), 0.02);
        assert_eq!(body.position(), Vec3::ZERO);

        body.integrate(0.02);
        body.integrate(0.02);
        assert_eq!(body.position(), Vec3::ZERO);

        body.integrate(0.02);
        assert_relative_eq!(body.last_frame_time(), 0.08, epsilon = 1e-6);
        assert_eq!(body.accum_delta_time(), 0.0);
        assert!(body.position().y < 0.0);
    }

    #[test]
    fn friction_never_exceeds_reversal() {
        let friction = compute_friction_velocity(Vec3::Y, Vec3::new(0.1, -1.0, 0.0), 10.0, 1.0, 0.5, 0.5);
        assert_relative_eq!(friction.x, -0.1, epsilon = 1e-6);

        let sliding = compute_friction_velocity(Vec3::Y, Vec3::new(10.0, -1.0, 0.0), 1.0, 1.0, 0.5, 0.3);
        assert_relative_eq!(sliding.x, -0.3, epsilon = 1e-6);

        assert_eq!(compute_friction_velocity(Vec3::Y, Vec3::Y, 1.0, 1.0, 0.5, 0.5), Vec3::ZERO);
    }

    #[test]
    fn try_wake_respects_force_freeze_and_velocity() {
        let mut body = unit_sphere();
        body.freeze();
        assert!(!body.try_wake(false));

        body.wake();
        body.object.set_flags(BodyFlags::FROZEN);
        assert!(!body.try_wake(true));
        body.set_linear_velocity(Vec3::X);
        assert!(body.try_wake(true));
        assert!(!body.is_frozen());
    }

    #[test]
    fn resting_body_without_gravity_does_not_drift() {
        let mut body = unit_sphere();
        body.set_gravity(0.0);
        body.set_position(Vec3::new(1.0, 2.0, 3.0));
        let orientation = body.orientation();

        for dt in [1.0 / 60.0, 0.1, 1.0] {
            body.integrate(dt);
            body.update(dt);
        }
        assert_eq!(body.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(body.orientation(), orientation);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
    }
}
