use glam::Vec3;

use super::hinge::HingeJoint;
use crate::{
    core::{rigidbody::RigidBody, types::BodyId},
    utils::Arena,
};

pub struct ConstraintFlags;

impl ConstraintFlags {
    pub const BODYA_NOIMPULSE: u32 = 1 << 0;
    pub const BODYB_NOIMPULSE: u32 = 1 << 1;
}

/// Relative speed above which constraint corrections are clamped.
const MAX_CORRECTION_VELOCITY: f32 = 20.0;
const POINT_SUB_ITERATIONS: usize = 3;
const MIN_POINT_VELOCITY: f32 = 1e-5;
const MIN_MAX_DISTANCE_VELOCITY: f32 = 0.01;
const MIN_DENOMINATOR: f32 = 1e-6;

/// World anchor of a body-local offset and its lever arm from the center of mass.
fn anchor(body: &RigidBody, local: Vec3) -> (Vec3, Vec3) {
    let world = body.position() + body.orientation() * local;
    (world, body.lever_arm(world))
}

/// Keeps two body-local anchors together, allowing `allowed_distance` of slack.
#[derive(Debug, Clone)]
pub struct PointConstraint {
    body0: BodyId,
    body1: BodyId,
    local_pos0: Vec3,
    local_pos1: Vec3,
    allowed_distance: f32,
    timescale: f32,
    flags: u32,

    world_pos: Vec3,
    r0: Vec3,
    r1: Vec3,
    vr_extra: Vec3,
    enabled: bool,
    satisfied: bool,
}

impl PointConstraint {
    pub fn new(
        body0: BodyId,
        local_pos0: Vec3,
        body1: BodyId,
        local_pos1: Vec3,
        allowed_distance: f32,
        timescale: f32,
        flags: u32,
    ) -> Self {
        Self {
            body0,
            body1,
            local_pos0,
            local_pos1,
            allowed_distance,
            timescale,
            flags,
            world_pos: Vec3::ZERO,
            r0: Vec3::ZERO,
            r1: Vec3::ZERO,
            vr_extra: Vec3::ZERO,
            enabled: true,
            satisfied: false,
        }
    }

    /// Midpoint of the two anchors at the last `pre_apply`.
    pub fn world_position(&self) -> Vec3 {
        self.world_pos
    }

    pub fn allowed_distance(&self) -> f32 {
        self.allowed_distance
    }

    pub fn pre_apply(&mut self, dt: f32, bodies: &Arena<RigidBody, BodyId>) {
        self.satisfied = false;

        let (Some(b0), Some(b1)) = (bodies.get(self.body0), bodies.get(self.body1)) else {
            return;
        };

        let (p0, r0) = anchor(b0, self.local_pos0);
        let (p1, r1) = anchor(b1, self.local_pos1);
        self.r0 = r0;
        self.r1 = r1;
        self.world_pos = (p0 + p1) * 0.5;

        let deviation = p0 - p1;
        let distance = deviation.length();
        self.vr_extra = if distance > self.allowed_distance {
            deviation * ((distance - self.allowed_distance) / (distance * self.timescale.max(dt)))
        } else {
            Vec3::ZERO
        };
    }

    pub fn apply(&mut self, _dt: f32, bodies: &mut Arena<RigidBody, BodyId>, touched: &mut Vec<BodyId>) -> bool {
        self.satisfied = true;

        let Some((b0, b1)) = bodies.get2_mut(self.body0, self.body1) else {
            return false;
        };

        let mut applied = false;
        for _ in 0..POINT_SUB_ITERATIONS {
            let mut vr = self.vr_extra + b0.velocity_at_local_point(self.r0) - b1.velocity_at_local_point(self.r1);
            let mut speed = vr.length();
            if speed < MIN_POINT_VELOCITY {
                break;
            }

            if speed > MAX_CORRECTION_VELOCITY {
                vr *= MAX_CORRECTION_VELOCITY / speed;
                speed = MAX_CORRECTION_VELOCITY;
            }

            let normal = vr / speed;
            let denominator = b0.compute_impulse_denominator(self.r0, normal)
                + b1.compute_impulse_denominator(self.r1, normal);
            if denominator < MIN_DENOMINATOR {
                break;
            }

            let impulse = normal * (speed / denominator);
            if self.flags & ConstraintFlags::BODYA_NOIMPULSE == 0 {
                b0.apply_impulse(self.r0, -impulse);
            }
            if self.flags & ConstraintFlags::BODYB_NOIMPULSE == 0 {
                b1.apply_impulse(self.r1, impulse);
            }

            // Every sub-iteration re-settles the dependent constraints.
            touched.push(self.body0);
            touched.push(self.body1);
            applied = true;
        }

        applied
    }
}

/// Rope-like limit: only acts when the anchors would drift past `max_distance`.
#[derive(Debug, Clone)]
pub struct MaxDistanceConstraint {
    body0: BodyId,
    body1: BodyId,
    local_pos0: Vec3,
    local_pos1: Vec3,
    max_distance: f32,
    flags: u32,

    r0: Vec3,
    r1: Vec3,
    deviation: Vec3,
    enabled: bool,
    satisfied: bool,
}

impl MaxDistanceConstraint {
    pub fn new(
        body0: BodyId,
        local_pos0: Vec3,
        body1: BodyId,
        local_pos1: Vec3,
        max_distance: f32,
        flags: u32,
    ) -> Self {
        Self {
            body0,
            body1,
            local_pos0,
            local_pos1,
            max_distance,
            flags,
            r0: Vec3::ZERO,
            r1: Vec3::ZERO,
            deviation: Vec3::ZERO,
            enabled: true,
            satisfied: false,
        }
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn pre_apply(&mut self, _dt: f32, bodies: &Arena<RigidBody, BodyId>) {
        self.satisfied = false;

        let (Some(b0), Some(b1)) = (bodies.get(self.body0), bodies.get(self.body1)) else {
            return;
        };

        let (p0, r0) = anchor(b0, self.local_pos0);
        let (p1, r1) = anchor(b1, self.local_pos1);
        self.r0 = r0;
        self.r1 = r1;
        self.deviation = p0 - p1;
    }

    pub fn apply(&mut self, dt: f32, bodies: &mut Arena<RigidBody, BodyId>, touched: &mut Vec<BodyId>) -> bool {
        self.satisfied = true;
        if dt <= 0.0 {
            return false;
        }

        let Some((b0, b1)) = bodies.get2_mut(self.body0, self.body1) else {
            return false;
        };

        let relative_velocity = b0.velocity_at_local_point(self.r0) - b1.velocity_at_local_point(self.r1);
        let predicted = self.deviation + relative_velocity * dt;
        let predicted_distance = predicted.length();
        if predicted_distance <= self.max_distance {
            return false;
        }

        let clamped = predicted * (self.max_distance / predicted_distance);
        let desired_velocity = (clamped - self.deviation) / dt;

        let mut vr = relative_velocity - desired_velocity;
        let mut speed = vr.length();
        if speed > MAX_CORRECTION_VELOCITY {
            vr *= MAX_CORRECTION_VELOCITY / speed;
            speed = MAX_CORRECTION_VELOCITY;
        } else if speed < MIN_MAX_DISTANCE_VELOCITY {
            return false;
        }

        let normal = vr / speed;
        let denominator =
            b0.compute_impulse_denominator(self.r0, normal) + b1.compute_impulse_denominator(self.r1, normal);
        if denominator < MIN_DENOMINATOR {
            return false;
        }

        let impulse = normal * (speed / denominator);
        if self.flags & ConstraintFlags::BODYA_NOIMPULSE == 0 {
            b0.apply_impulse(self.r0, -impulse);
        }
        if self.flags & ConstraintFlags::BODYB_NOIMPULSE == 0 {
            b1.apply_impulse(self.r1, impulse);
        }

        touched.push(self.body0);
        touched.push(self.body1);
        true
    }
}

/// Constraint kinds the world can step.
#[derive(Debug, Clone)]
pub enum Constraint {
    Point(PointConstraint),
    MaxDistance(MaxDistanceConstraint),
    Hinge(Box<HingeJoint>),
}

impl Constraint {
    pub fn bodies(&self) -> (BodyId, BodyId) {
        match self {
            Constraint::Point(c) => (c.body0, c.body1),
            Constraint::MaxDistance(c) => (c.body0, c.body1),
            Constraint::Hinge(h) => h.bodies(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Constraint::Point(c) => c.enabled,
            Constraint::MaxDistance(c) => c.enabled,
            Constraint::Hinge(h) => h.is_enabled(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Constraint::Point(c) => c.enabled = enabled,
            Constraint::MaxDistance(c) => c.enabled = enabled,
            Constraint::Hinge(h) => h.set_enabled(enabled),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        match self {
            Constraint::Point(c) => c.satisfied,
            Constraint::MaxDistance(c) => c.satisfied,
            Constraint::Hinge(h) => h.is_satisfied(),
        }
    }

    pub(crate) fn set_unsatisfied(&mut self) {
        match self {
            Constraint::Point(c) => c.satisfied = false,
            Constraint::MaxDistance(c) => c.satisfied = false,
            Constraint::Hinge(h) => h.set_unsatisfied(),
        }
    }

    pub fn pre_apply(&mut self, dt: f32, bodies: &Arena<RigidBody, BodyId>) {
        match self {
            Constraint::Point(c) => c.pre_apply(dt, bodies),
            Constraint::MaxDistance(c) => c.pre_apply(dt, bodies),
            Constraint::Hinge(h) => h.pre_apply(dt, bodies),
        }
    }

    /// Solves once; bodies that received impulses are appended to `touched`.
    pub fn apply(&mut self, dt: f32, bodies: &mut Arena<RigidBody, BodyId>, touched: &mut Vec<BodyId>) -> bool {
        match self {
            Constraint::Point(c) => c.apply(dt, bodies, touched),
            Constraint::MaxDistance(c) => c.apply(dt, bodies, touched),
            Constraint::Hinge(h) => h.apply(dt, bodies, touched),
        }
    }

    /// Controller-phase work, run before integration.
    pub fn update(&mut self, dt: f32, bodies: &mut Arena<RigidBody, BodyId>) {
        if let Constraint::Hinge(h) = self {
            h.update(dt, bodies);
        }
    }

    pub fn as_hinge(&self) -> Option<&HingeJoint> {
        match self {
            Constraint::Hinge(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hinge_mut(&mut self) -> Option<&mut HingeJoint> {
        match self {
            Constraint::Hinge(h) => Some(h),
            _ => None,
        }
    }
}

impl From<PointConstraint> for Constraint {
    fn from(c: PointConstraint) -> Self {
        Constraint::Point(c)
    }
}

impl From<MaxDistanceConstraint> for Constraint {
    fn from(c: MaxDistanceConstraint) -> Self {
        Constraint::MaxDistance(c)
    }
}

impl From<HingeJoint> for Constraint {
    fn from(h: HingeJoint) -> Self {
        Constraint::Hinge(Box::new(h))
    }
}

// Sub-constraint plumbing for the hinge.
impl PointConstraint {
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    pub(crate) fn set_unsatisfied(&mut self) {
        self.satisfied = false;
    }
}

impl MaxDistanceConstraint {
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    pub(crate) fn set_unsatisfied(&mut self) {
        self.satisfied = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arena_with_two_balls(gap: f32) -> (Arena<RigidBody, BodyId>, BodyId, BodyId) {
        let mut bodies = Arena::new();
        let mut make = |x: f32| {
            let mut body = RigidBody::new();
            assert!(body.initialize_sphere(0.5));
            body.set_mass(1.0);
            body.set_position(Vec3::new(x, 0.0, 0.0));
            bodies.insert(body)
        };
        let a = make(0.0);
        let b = make(gap);
        (bodies, a, b)
    }

    #[test]
    fn point_constraint_pulls_anchors_together() {
        let (mut bodies, a, b) = arena_with_two_balls(2.0);
        let mut c = Constraint::from(PointConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 0.0, 0.0, 0));

        let mut touched = Vec::new();
        c.pre_apply(0.1, &bodies);
        assert!(!c.is_satisfied());
        assert!(c.apply(0.1, &mut bodies, &mut touched));
        assert!(c.is_satisfied());

        let va = bodies.get(a).map(|body| body.linear_velocity()).unwrap_or_default();
        let vb = bodies.get(b).map(|body| body.linear_velocity()).unwrap_or_default();
        assert!(va.x > 0.0 && vb.x < 0.0);
        assert_relative_eq!(va.x, -vb.x, epsilon = 1e-5);
        assert!(touched.contains(&a) && touched.contains(&b));
    }

    #[test]
    fn no_impulse_flag_keeps_body_still() {
        let (mut bodies, a, b) = arena_with_two_balls(2.0);
        let mut c = PointConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 0.0, 0.0, ConstraintFlags::BODYA_NOIMPULSE);
        c.pre_apply(0.1, &bodies);
        c.apply(0.1, &mut bodies, &mut Vec::new());
        assert_eq!(bodies.get(a).map(|body| body.linear_velocity()), Some(Vec3::ZERO));
    }

    #[test]
    fn max_distance_is_inactive_within_limit() {
        let (mut bodies, a, b) = arena_with_two_balls(1.0);
        let mut c = MaxDistanceConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 2.0, 0);
        c.pre_apply(0.1, &bodies);
        assert!(!c.apply(0.1, &mut bodies, &mut Vec::new()));

        if let Some(body) = bodies.get_mut(b) {
            body.set_linear_velocity(Vec3::new(20.0, 0.0, 0.0));
        }
        c.pre_apply(0.1, &bodies);
        assert!(c.apply(0.1, &mut bodies, &mut Vec::new()));
        let vb = bodies.get(b).map(|body| body.linear_velocity().x).unwrap_or_default();
        assert!(vb < 20.0);
    }
}
