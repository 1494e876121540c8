use glam::Vec3;

use super::constraints::{ConstraintFlags, MaxDistanceConstraint, PointConstraint};
use crate::{
    config::MAX_HINGE_ANGLE_LIMIT,
    core::{rigidbody::RigidBody, types::BodyId},
    utils::{math::rotate_about_axis, Arena},
};

const HINGE_MID_ALLOWED_DISTANCE: f32 = 0.01;
const HINGE_MID_TIMESCALE: f32 = 1.0 / 20.0;
/// Length of the limit "arm", in hinge half widths.
const HINGE_ARM_SCALE: f32 = 10.0;

/// Parameters of [`HingeJoint::new`]. Angles are in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HingeDesc {
    /// Hinge axis in body 0 space.
    pub axis: Vec3,
    /// Hinge center relative to body 0.
    pub position_rel0: Vec3,
    pub half_width: f32,
    pub forward_angle: f32,
    pub backward_angle: f32,
    pub sideways_slack: f32,
    pub damping: f32,
    /// [`ConstraintFlags`] forwarded to every sub-constraint.
    pub flags: u32,
}

impl Default for HingeDesc {
    fn default() -> Self {
        Self {
            axis: Vec3::X,
            position_rel0: Vec3::ZERO,
            half_width: 0.5,
            forward_angle: MAX_HINGE_ANGLE_LIMIT + 1.0,
            backward_angle: 0.0,
            sideways_slack: 0.01,
            damping: 0.0,
            flags: 0,
        }
    }
}

/// A door-style joint made of two side pivots, a mid pivot and an optional swing limit.
#[derive(Debug, Clone)]
pub struct HingeJoint {
    body0: BodyId,
    body1: BodyId,
    axis: Vec3,
    damping: f32,
    flags: u32,
    use_limits: bool,
    broken: bool,
    enabled: bool,

    mid: PointConstraint,
    limit: MaxDistanceConstraint,
    sides: [PointConstraint; 2],
}

impl HingeJoint {
    /// Builds the joint from the current poses of both bodies.
    /// Returns `None` if either body is missing.
    pub fn new(
        body0: BodyId,
        body1: BodyId,
        desc: &HingeDesc,
        bodies: &Arena<RigidBody, BodyId>,
    ) -> Option<Self> {
        let b0 = bodies.get(body0)?;
        let b1 = bodies.get(body1)?;

        let axis = desc.axis.normalize_or_zero();
        let hinge_world = b0.position() + b0.orientation() * desc.position_rel0;
        let position_rel1 = b1.orientation().conjugate() * (hinge_world - b1.position());

        let side_offset = axis * desc.half_width;
        let side_allowed = desc.sideways_slack * desc.half_width;

        let sides = [
            PointConstraint::new(
                body0,
                desc.position_rel0 + side_offset,
                body1,
                position_rel1 + side_offset,
                side_allowed,
                0.0,
                desc.flags,
            ),
            PointConstraint::new(
                body0,
                desc.position_rel0 - side_offset,
                body1,
                position_rel1 - side_offset,
                side_allowed,
                0.0,
                desc.flags,
            ),
        ];

        let mid = PointConstraint::new(
            body0,
            desc.position_rel0,
            body1,
            position_rel1,
            HINGE_MID_ALLOWED_DISTANCE,
            HINGE_MID_TIMESCALE,
            desc.flags,
        );

        let use_limits = desc.forward_angle <= MAX_HINGE_ANGLE_LIMIT;
        let mut limit = MaxDistanceConstraint::new(body0, Vec3::ZERO, body1, Vec3::ZERO, 0.0, desc.flags);

        if use_limits {
            let mut perp = Vec3::Z;
            if perp.dot(axis) > 0.1 {
                perp = Vec3::Y;
            }
            let side_axis = axis.cross(perp);
            let perp = side_axis.cross(axis).normalize_or_zero();

            let arm = HINGE_ARM_SCALE * desc.half_width;
            let anchor0 = perp * arm;

            // Body 1's anchor sits in the middle of the allowed swing.
            let angle_to_middle = 0.5 * (desc.forward_angle - desc.backward_angle);
            let anchor1 = rotate_about_axis(axis, -angle_to_middle, anchor0);

            let anchor0 = b0.orientation() * anchor0;
            let anchor1 = b1.orientation() * anchor1;

            let half_angle = 0.5 * (desc.forward_angle + desc.backward_angle);
            let allowed = arm * 2.0 * (half_angle * 0.5).sin();

            let rel0 = b0.orientation().conjugate() * (hinge_world + anchor0 - b0.position());
            let rel1 = b1.orientation().conjugate() * (hinge_world + anchor1 - b1.position());
            limit = MaxDistanceConstraint::new(body0, rel0, body1, rel1, allowed, desc.flags);
        } else {
            limit.set_enabled(false);
        }

        let damping = if desc.damping <= 0.0 { -1.0 } else { desc.damping.clamp(0.0, 1.0) };

        Some(Self {
            body0,
            body1,
            axis,
            damping,
            flags: desc.flags,
            use_limits,
            broken: false,
            enabled: true,
            mid,
            limit,
            sides,
        })
    }

    pub fn bodies(&self) -> (BodyId, BodyId) {
        (self.body0, self.body1)
    }

    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    pub fn uses_limits(&self) -> bool {
        self.use_limits
    }

    pub fn is_limit_enabled(&self) -> bool {
        self.limit.is_enabled()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.mid.set_enabled(enabled);
        for side in &mut self.sides {
            side.set_enabled(enabled);
        }
        if self.use_limits && !self.broken {
            self.limit.set_enabled(enabled);
        }
        self.enabled = enabled;
    }

    /// Drops the swing limit; the pivots keep holding.
    pub fn break_joint(&mut self) {
        if self.broken {
            return;
        }
        if self.use_limits {
            self.limit.set_enabled(false);
        }
        self.broken = true;
    }

    pub fn restore(&mut self) {
        if !self.broken {
            return;
        }
        if self.use_limits {
            self.limit.set_enabled(true);
        }
        self.broken = false;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn is_satisfied(&self) -> bool {
        (!self.mid.is_enabled() || self.mid.is_satisfied())
            && (!self.limit.is_enabled() || self.limit.is_satisfied())
            && self.sides.iter().all(|s| !s.is_enabled() || s.is_satisfied())
    }

    pub(crate) fn set_unsatisfied(&mut self) {
        self.mid.set_unsatisfied();
        self.limit.set_unsatisfied();
        for side in &mut self.sides {
            side.set_unsatisfied();
        }
    }

    pub fn pre_apply(&mut self, dt: f32, bodies: &Arena<RigidBody, BodyId>) {
        if self.mid.is_enabled() {
            self.mid.pre_apply(dt, bodies);
        }
        if self.limit.is_enabled() {
            self.limit.pre_apply(dt, bodies);
        }
        for side in &mut self.sides {
            if side.is_enabled() {
                side.pre_apply(dt, bodies);
            }
        }
    }

    /// Mid pivot, swing limit, then both side pivots.
    pub fn apply(&mut self, dt: f32, bodies: &mut Arena<RigidBody, BodyId>, touched: &mut Vec<BodyId>) -> bool {
        let mut applied = false;
        if self.mid.is_enabled() {
            applied |= self.mid.apply(dt, bodies, touched);
        }
        if self.limit.is_enabled() {
            applied |= self.limit.apply(dt, bodies, touched);
        }
        for side in &mut self.sides {
            if side.is_enabled() {
                applied |= side.apply(dt, bodies, touched);
            }
        }
        applied
    }

    /// Damps the relative spin of the two bodies about their effective hinge axis.
    pub fn update(&mut self, _dt: f32, bodies: &mut Arena<RigidBody, BodyId>) {
        if self.damping <= 0.0 {
            return;
        }

        let Some((b0, b1)) = bodies.get2_mut(self.body0, self.body1) else {
            return;
        };

        let w0 = b0.angular_velocity();
        let w1 = b1.angular_velocity();
        let axis = (w1 - w0).normalize_or_zero();

        let rot0 = w0.dot(axis);
        let rot1 = w1.dot(axis);
        let average = 0.5 * (rot0 + rot1);

        let frac = 1.0 - self.damping;
        let new_rot0 = average + (rot0 - average) * frac;
        let new_rot1 = average + (rot1 - average) * frac;

        if self.flags & ConstraintFlags::BODYA_NOIMPULSE == 0 {
            b0.set_angular_velocity(w0 + (new_rot0 - rot0) * axis);
        }
        if self.flags & ConstraintFlags::BODYB_NOIMPULSE == 0 {
            b1.set_angular_velocity(w1 + (new_rot1 - rot1) * axis);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn door() -> (Arena<RigidBody, BodyId>, BodyId, BodyId) {
        let mut bodies = Arena::new();
        let mut frame = RigidBody::new();
        assert!(frame.initialize_box(Vec3::new(-0.1, -1.0, -0.1), Vec3::new(0.1, 1.0, 0.1)));
        frame.set_mass(10.0);
        let mut panel = RigidBody::new();
        assert!(panel.initialize_box(Vec3::new(-0.5, -1.0, -0.05), Vec3::new(0.5, 1.0, 0.05)));
        panel.set_mass(2.0);
        panel.set_position(Vec3::new(0.6, 0.0, 0.0));
        let a = bodies.insert(frame);
        let b = bodies.insert(panel);
        (bodies, a, b)
    }

    fn limited() -> HingeDesc {
        HingeDesc {
            axis: Vec3::Y,
            position_rel0: Vec3::new(0.1, 0.0, 0.0),
            half_width: 1.0,
            forward_angle: 90f32.to_radians(),
            backward_angle: 0.0,
            damping: 0.5,
            ..HingeDesc::default()
        }
    }

    #[test]
    fn break_and_restore_toggle_only_the_limit() {
        let (bodies, a, b) = door();
        let mut hinge = HingeJoint::new(a, b, &limited(), &bodies).expect("both bodies exist");
        assert!(hinge.uses_limits());
        assert!(hinge.is_limit_enabled());

        hinge.break_joint();
        assert!(hinge.is_broken());
        assert!(!hinge.is_limit_enabled());

        // Re-enabling a broken hinge leaves the limit off.
        hinge.set_enabled(false);
        hinge.set_enabled(true);
        assert!(!hinge.is_limit_enabled());

        hinge.restore();
        assert!(!hinge.is_broken());
        assert!(hinge.is_limit_enabled());
    }

    #[test]
    fn wide_angles_disable_the_limit_and_damping_clamps() {
        let (bodies, a, b) = door();
        let desc = HingeDesc {
            forward_angle: 170f32.to_radians(),
            damping: 3.0,
            ..limited()
        };
        let hinge = HingeJoint::new(a, b, &desc, &bodies).expect("both bodies exist");
        assert!(!hinge.uses_limits());
        assert!(!hinge.is_limit_enabled());
        assert_eq!(hinge.damping(), 1.0);

        let undamped = HingeJoint::new(a, b, &HingeDesc::default(), &bodies).expect("both bodies exist");
        assert_eq!(undamped.damping(), -1.0);
    }

    #[test]
    fn damping_pulls_spins_toward_their_average() {
        let (mut bodies, a, b) = door();
        let mut hinge = HingeJoint::new(a, b, &limited(), &bodies).expect("both bodies exist");
        if let Some(body) = bodies.get_mut(b) {
            body.set_angular_velocity(Vec3::new(0.0, 2.0, 0.0));
        }

        hinge.update(0.016, &mut bodies);

        let w0 = bodies.get(a).map(|body| body.angular_velocity().y).unwrap_or_default();
        let w1 = bodies.get(b).map(|body| body.angular_velocity().y).unwrap_or_default();
        assert_relative_eq!(w0, 0.5, epsilon = 1e-5);
        assert_relative_eq!(w1, 1.5, epsilon = 1e-5);
    }
}
