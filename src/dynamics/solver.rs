use glam::Vec3;

use crate::{
    collision::contact::ContactPair,
    config::IMPULSE_DENOMINATOR_EPSILON,
    core::{
        collider::CollisionObject,
        rigidbody::{compute_friction_velocity, RigidBody},
        types::{BodyFlags, ObjectFlags, PairFlags},
    },
};

/// Side A of a contact pair as seen by the solver.
pub enum ContactBody<'a> {
    Static(&'a CollisionObject),
    Dynamic(&'a mut RigidBody),
}

impl ContactBody<'_> {
    fn flags(&self) -> u32 {
        match self {
            ContactBody::Static(object) => object.flags(),
            ContactBody::Dynamic(body) => body.flags(),
        }
    }
}

/// Sequential impulse for one contact; returns the normal impulse magnitude.
///
/// `pair.normal` must point from B toward A. Velocity impulses use the
/// restitution-weighted speed, friction is derived from the plain normal
/// impulse. Each side only receives its share when it responds to the other.
pub fn apply_impulse_response_to(
    pair: &ContactPair,
    mut body_a: ContactBody<'_>,
    body_b: &mut RigidBody,
    error_correction: f32,
) -> f32 {
    let normal = pair.normal;
    let flags_a = body_a.flags();
    let flags_b = body_b.flags();

    let rel_b = body_b.lever_arm(pair.position);
    let mut contact_velocity = body_b.velocity_at_local_point(rel_b);

    let mut denominator = 0.0;
    let mut rel_a = Vec3::ZERO;
    if let ContactBody::Dynamic(a) = &body_a {
        rel_a = a.lever_arm(pair.position);
        contact_velocity -= a.velocity_at_local_point(rel_a);
        if flags_a & BodyFlags::FORCE_FREEZE == 0 {
            denominator += a.compute_impulse_denominator(rel_a, normal);
        }
    }

    if flags_b & BodyFlags::FORCE_FREEZE == 0 {
        denominator += body_b.compute_impulse_denominator(rel_b, normal);
    }

    if denominator < IMPULSE_DENOMINATOR_EPSILON {
        return 0.0;
    }

    let combined_restitution = 1.0 + (pair.restitution_a + pair.restitution_b);
    let combined_friction = (pair.friction_a + pair.friction_b) * 0.5;

    let speed = contact_velocity.dot(normal);
    let inv_den = 1.0 / denominator;
    let penetration_impulse = error_correction * inv_den;

    let normal_impulse = (penetration_impulse + speed * inv_den).max(0.0);
    let restitution_impulse = (penetration_impulse + speed * combined_restitution * inv_den).max(0.0);

    let impulse = normal * restitution_impulse;
    let friction = compute_friction_velocity(
        normal,
        contact_velocity,
        normal_impulse,
        denominator,
        combined_friction,
        combined_friction,
    );

    if let ContactBody::Dynamic(a) = &mut body_a {
        let blocked = pair.flags & PairFlags::OBJECTA_NO_RESPONSE != 0
            || (flags_a & BodyFlags::INFINITE_MASS != 0 && flags_b & BodyFlags::MOVEABLE != 0)
            || flags_b & ObjectFlags::DISABLE_RESPONSE != 0
            || flags_a & BodyFlags::FORCE_FREEZE != 0;
        if !blocked {
            a.apply_impulse(rel_a, impulse - friction);
            a.try_wake(true);
        }
    }

    let blocked = pair.flags & PairFlags::OBJECTB_NO_RESPONSE != 0
        || (flags_b & BodyFlags::INFINITE_MASS != 0 && flags_a & BodyFlags::MOVEABLE != 0)
        || flags_a & ObjectFlags::DISABLE_RESPONSE != 0
        || flags_b & BodyFlags::FORCE_FREEZE != 0;
    if !blocked {
        body_b.apply_impulse(rel_b, -impulse + friction);
        body_b.try_wake(true);
    }

    normal_impulse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BodyId, ObjectHandle, ObjectId};
    use crate::utils::EntityId;
    use approx::assert_relative_eq;

    fn ball(position: Vec3, velocity: Vec3) -> RigidBody {
        let mut body = RigidBody::new();
        assert!(body.initialize_sphere(0.5));
        body.set_mass(1.0);
        body.set_position(position);
        body.set_linear_velocity(velocity);
        body
    }

    fn head_on_pair(restitution: f32) -> ContactPair {
        ContactPair {
            object_a: ObjectHandle::Body(BodyId(EntityId::new(0, 0))),
            body_b: BodyId(EntityId::new(1, 0)),
            position: Vec3::new(0.5, 0.0, 0.0),
            normal: -Vec3::X,
            depth: 0.0,
            dt: 1.0,
            restitution_a: restitution,
            restitution_b: restitution,
            friction_a: 0.0,
            friction_b: 0.0,
            flags: 0,
        }
    }

    #[test]
    fn equal_masses_exchange_momentum() {
        let mut a = ball(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let mut b = ball(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));

        // Restitutions summing to 1 make the bounce fully elastic.
        let impulse = apply_impulse_response_to(&head_on_pair(0.5), ContactBody::Dynamic(&mut a), &mut b, 0.0);

        // Closing speed is 2 and the summed inverse masses are 2.
        assert_relative_eq!(impulse, 1.0, epsilon = 1e-5);
        assert_relative_eq!(a.linear_velocity().x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(b.linear_velocity().x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_restitution_stops_both_bodies() {
        let mut a = ball(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let mut b = ball(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        apply_impulse_response_to(&head_on_pair(0.0), ContactBody::Dynamic(&mut a), &mut b, 0.0);
        assert_relative_eq!(a.linear_velocity().x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(b.linear_velocity().x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn separating_bodies_get_no_impulse() {
        let mut a = ball(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0));
        let mut b = ball(Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let impulse = apply_impulse_response_to(&head_on_pair(0.0), ContactBody::Dynamic(&mut a), &mut b, 0.0);
        assert_eq!(impulse, 0.0);
        assert_relative_eq!(b.linear_velocity().x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn static_side_never_moves_and_zero_mass_bails() {
        let mut ground = CollisionObject::new();
        assert!(ground.initialize_box(Vec3::splat(-1.0), Vec3::splat(1.0)));

        let mut b = ball(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        let mut pair = head_on_pair(0.5);
        pair.object_a = ObjectHandle::Object(ObjectId(EntityId::new(0, 0)));
        let impulse = apply_impulse_response_to(&pair, ContactBody::Static(&ground), &mut b, 0.0);
        assert_relative_eq!(impulse, 1.0, epsilon = 1e-5);
        assert_relative_eq!(b.linear_velocity().x, 1.0, epsilon = 1e-5);

        let mut massless = RigidBody::new();
        assert!(massless.initialize_sphere(0.5));
        assert_eq!(
            apply_impulse_response_to(&pair, ContactBody::Static(&ground), &mut massless, 0.0),
            0.0
        );
    }
}
