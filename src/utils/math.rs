//! Additional math helpers layered on top of `glam`.

use glam::{Mat3, Quat, Vec2, Vec3};

use crate::core::types::Aabb;

/// Quaternion derivative `0.5 * (w, 0) * q`, unnormalized.
pub fn angular_velocity_spin(angular: Vec3, orientation: Quat) -> Quat {
    Quat::from_xyzw(angular.x * 0.5, angular.y * 0.5, angular.z * 0.5, 0.0) * orientation
}

/// Angular velocity that rotates `prev` into `current` over `dt`, taking the short arc.
pub fn angular_velocity_between(prev: Quat, current: Quat, dt: f32) -> Vec3 {
    let mut delta = current * prev.conjugate();
    if delta.w < 0.0 {
        delta = -delta;
    }
    Vec3::new(delta.x, delta.y, delta.z) * (2.0 / dt)
}

/// World-space tensor `R * diag(local) * R^T`.
pub fn rotate_diagonal_tensor(local: Vec3, orientation: Quat) -> Mat3 {
    let rotation = Mat3::from_quat(orientation);
    rotation * Mat3::from_diagonal(local) * rotation.transpose()
}

/// Reciprocal of each component, keeping zero components at zero.
pub fn safe_recip(v: Vec3) -> Vec3 {
    let inv = |x: f32| if x != 0.0 { 1.0 / x } else { 0.0 };
    Vec3::new(inv(v.x), inv(v.y), inv(v.z))
}

/// Bounds of `local` after rotating its eight corners.
pub fn rotate_aabb(local: &Aabb, orientation: Quat) -> Aabb {
    let mut out = Aabb::empty();
    for corner in local.corners() {
        out.extend(orientation * corner);
    }
    out
}

pub fn is_finite_vec(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Slab test of a segment-parametrised ray against a 2D rectangle.
/// Returns `(tnear, tfar)` in units of `dir`.
pub fn ray_rect_intersection(min: Vec2, max: Vec2, start: Vec2, dir: Vec2) -> Option<(f32, f32)> {
    let mut tnear = f32::NEG_INFINITY;
    let mut tfar = f32::INFINITY;

    for axis in 0..2 {
        if dir[axis].abs() < 1e-12 {
            if start[axis] < min[axis] || start[axis] > max[axis] {
                return None;
            }
            continue;
        }

        let inv = 1.0 / dir[axis];
        let mut t1 = (min[axis] - start[axis]) * inv;
        let mut t2 = (max[axis] - start[axis]) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        tnear = tnear.max(t1);
        tfar = tfar.min(t2);
        if tnear > tfar || tfar < 0.0 {
            return None;
        }
    }

    Some((tnear, tfar))
}

/// Rotation of `angle` radians about `axis`.
pub fn rotate_about_axis(axis: Vec3, angle: f32, v: Vec3) -> Vec3 {
    Quat::from_axis_angle(axis.normalize_or_zero(), angle) * v
}
