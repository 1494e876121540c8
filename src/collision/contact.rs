use glam::Vec3;
use smallvec::SmallVec;

use crate::{
    config::{PHYSICS_CONTACT_GROUP_DIST, PHYSICS_MANIFOLD_MAX},
    core::types::{BodyId, ObjectHandle},
    utils::math::is_finite_vec,
};

/// A contact scheduled for resolution; lives on the body that generated it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPair {
    pub object_a: ObjectHandle,
    pub body_b: BodyId,
    pub position: Vec3,
    /// Points toward `object_a`.
    pub normal: Vec3,
    pub depth: f32,
    /// Weight of this contact among the contacts of its pair.
    pub dt: f32,
    pub restitution_a: f32,
    pub restitution_b: f32,
    pub friction_a: f32,
    pub friction_b: f32,
    pub flags: u32,
}

/// Collision record reported to callbacks and collision lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionPairData {
    /// The object owning this record.
    pub object_a: ObjectHandle,
    pub object_b: ObjectHandle,
    pub position: Vec3,
    pub normal: Vec3,
    pub fract: f32,
    pub applied_impulse: f32,
    pub impact_velocity: f32,
    pub flags: u32,
    /// `0` when the owner was side A of the contact pair, `1` otherwise.
    pub body_index: u8,
}

/// One narrow-phase contact point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    /// Contact point on the surface of the first shape.
    pub position: Vec3,
    /// Unit normal pointing from the second shape toward the first.
    pub normal: Vec3,
    /// Signed separation, negative when penetrating.
    pub distance: f32,
    /// Surface parameter of the mesh triangle hit, `-1` otherwise.
    pub material: i32,
}

/// Fixed-capacity accumulator of manifold points with spatial grouping.
#[derive(Debug, Clone, Default)]
pub struct ManifoldResult {
    points: SmallVec<[ManifoldPoint; PHYSICS_MANIFOLD_MAX]>,
}

impl ManifoldResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a contact, merging it into a nearby one with the same material.
    pub fn add_point(&mut self, position: Vec3, normal: Vec3, distance: f32, material: i32) {
        if !is_finite_vec(position) || !is_finite_vec(normal) || !distance.is_finite() {
            return;
        }

        let near = |a: f32, b: f32| (a - b).abs() <= PHYSICS_CONTACT_GROUP_DIST;
        if let Some(existing) = self.points.iter_mut().find(|p| {
            p.material == material
                && near(p.position.x, position.x)
                && near(p.position.y, position.y)
                && near(p.position.z, position.z)
        }) {
            existing.position = (existing.position + position) * 0.5;
            existing.normal = (existing.normal + normal).normalize_or(existing.normal);
            existing.distance = (existing.distance + distance) * 0.5;
            return;
        }

        if self.points.len() < PHYSICS_MANIFOLD_MAX {
            self.points.push(ManifoldPoint {
                position,
                normal,
                distance,
                material,
            });
        }
    }

    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
