use glam::Vec3;

use crate::core::{collider::CollisionShape, types::Aabb};

/// Helper utilities for computing support points, bounds and inertia of shapes.
pub struct ShapeUtil;

impl ShapeUtil {
    /// Furthest point of the shape along `direction`, in shape space.
    pub fn support(shape: &CollisionShape, direction: Vec3) -> Vec3 {
        match shape {
            CollisionShape::Sphere { radius } => direction.normalize_or_zero() * *radius,
            CollisionShape::Box {
                center,
                half_extents,
            } => {
                *center
                    + Vec3::new(
                        if direction.x >= 0.0 { half_extents.x } else { -half_extents.x },
                        if direction.y >= 0.0 { half_extents.y } else { -half_extents.y },
                        if direction.z >= 0.0 { half_extents.z } else { -half_extents.z },
                    )
            }
            CollisionShape::Cylinder {
                radius,
                half_height,
            } => {
                let lateral = Vec3::new(direction.x, 0.0, direction.z).normalize_or_zero();
                let axial = if direction.y >= 0.0 { *half_height } else { -*half_height };
                lateral * *radius + Vec3::new(0.0, axial, 0.0)
            }
            CollisionShape::Convex { vertices } => Self::support_points(vertices, direction),
            CollisionShape::Compound { children } => children
                .iter()
                .map(|(offset, child)| *offset + Self::support(child, direction))
                .fold(None, |best: Option<Vec3>, p| match best {
                    Some(b) if b.dot(direction) >= p.dot(direction) => Some(b),
                    _ => Some(p),
                })
                .unwrap_or(Vec3::ZERO),
            CollisionShape::Mesh { mesh, .. } => Self::support_points(&mesh.vertices, direction),
        }
    }

    fn support_points(points: &[Vec3], direction: Vec3) -> Vec3 {
        let mut best = Vec3::ZERO;
        let mut best_dot = f32::NEG_INFINITY;
        for &p in points {
            let d = p.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = p;
            }
        }
        best
    }

    /// Untransformed bounds, including any center offset.
    pub fn local_aabb(shape: &CollisionShape) -> Aabb {
        match shape {
            CollisionShape::Sphere { radius } => Aabb::new(Vec3::splat(-*radius), Vec3::splat(*radius)),
            CollisionShape::Box {
                center,
                half_extents,
            } => Aabb::new(*center - *half_extents, *center + *half_extents),
            CollisionShape::Cylinder {
                radius,
                half_height,
            } => {
                let extent = Vec3::new(*radius, *half_height, *radius);
                Aabb::new(-extent, extent)
            }
            CollisionShape::Convex { vertices } => Aabb::from_points(vertices),
            CollisionShape::Compound { children } => {
                let mut bounds = Aabb::empty();
                for (offset, child) in children {
                    bounds.merge(&Self::local_aabb(child).translated(*offset));
                }
                bounds
            }
            CollisionShape::Mesh { mesh, .. } => mesh.bounds,
        }
    }

    /// Principal moments of inertia for a body of `mass` with this shape.
    pub fn local_inertia(shape: &CollisionShape, mass: f32) -> Vec3 {
        match shape {
            CollisionShape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            CollisionShape::Box { half_extents, .. } => Self::box_inertia(*half_extents * 2.0, mass),
            CollisionShape::Cylinder {
                radius,
                half_height,
            } => {
                let height = half_height * 2.0;
                let t1 = mass / 12.0 * height * height + mass / 4.0 * radius * radius;
                Vec3::new(t1, mass / 2.0 * radius * radius, t1)
            }
            CollisionShape::Convex { .. } | CollisionShape::Compound { .. } => {
                Self::box_inertia(Self::local_aabb(shape).size(), mass)
            }
            CollisionShape::Mesh { .. } => Vec3::ZERO,
        }
    }

    fn box_inertia(size: Vec3, mass: f32) -> Vec3 {
        let sq = size * size;
        Vec3::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y) * (mass / 12.0)
    }

    pub fn bounding_radius(shape: &CollisionShape) -> f32 {
        match shape {
            CollisionShape::Sphere { radius } => *radius,
            CollisionShape::Box {
                center,
                half_extents,
            } => center.length() + half_extents.length(),
            CollisionShape::Cylinder {
                radius,
                half_height,
            } => (radius * radius + half_height * half_height).sqrt(),
            CollisionShape::Convex { vertices } => {
                vertices.iter().map(|v| v.length()).fold(0.0, f32::max)
            }
            CollisionShape::Compound { children } => children
                .iter()
                .map(|(offset, child)| offset.length() + Self::bounding_radius(child))
                .fold(0.0, f32::max),
            CollisionShape::Mesh { mesh, .. } => {
                mesh.bounds.min.length().max(mesh.bounds.max.length())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_bounds_follow_center_offset() {
        let shape = CollisionShape::Box {
            center: Vec3::new(0.0, 1.0, 0.0),
            half_extents: Vec3::ONE,
        };
        let bounds = ShapeUtil::local_aabb(&shape);
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 1.0));
        assert_eq!(ShapeUtil::support(&shape, Vec3::Y), Vec3::new(1.0, 2.0, 1.0));
    }

    #[test]
    fn inertia_matches_closed_forms() {
        let sphere = ShapeUtil::local_inertia(&CollisionShape::Sphere { radius: 2.0 }, 5.0);
        assert_relative_eq!(sphere.x, 0.4 * 5.0 * 4.0);

        let cube = ShapeUtil::local_inertia(
            &CollisionShape::Box {
                center: Vec3::ZERO,
                half_extents: Vec3::splat(0.5),
            },
            12.0,
        );
        assert_relative_eq!(cube.y, 2.0);

        let cylinder = ShapeUtil::local_inertia(
            &CollisionShape::Cylinder {
                radius: 1.0,
                half_height: 1.0,
            },
            12.0,
        );
        assert_relative_eq!(cylinder.y, 6.0);
        assert_relative_eq!(cylinder.x, 4.0 + 3.0);
    }
}
