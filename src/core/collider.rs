use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{
    mesh::TriangleMesh,
    types::{Aabb, ObjectFlags},
};
use crate::{
    collision::{
        broadphase::CellRange,
        contact::{CollisionPairData, ContactPair},
        shapes::ShapeUtil,
    },
    config::{
        BODY_DEFAULT_FRICTION, BODY_DEFAULT_RESTITUTION, PHYSICS_AABB_EXPAND,
        PHYSICS_COLLISION_LIST_MAX,
    },
    utils::math,
};

/// Closed set of collision geometries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollisionShape {
    Sphere {
        radius: f32,
    },
    Box {
        center: Vec3,
        half_extents: Vec3,
    },
    /// Y-aligned cylinder.
    Cylinder {
        radius: f32,
        half_height: f32,
    },
    Convex {
        vertices: Vec<Vec3>,
    },
    Compound {
        children: Vec<(Vec3, CollisionShape)>,
    },
    Mesh {
        mesh: Arc<TriangleMesh>,
        internal_edges: bool,
    },
}

impl CollisionShape {
    pub fn is_convex(&self) -> bool {
        match self {
            CollisionShape::Mesh { .. } => false,
            CollisionShape::Compound { children } => {
                children.iter().all(|(_, child)| child.is_convex())
            }
            _ => true,
        }
    }

    pub fn mesh(&self) -> Option<&TriangleMesh> {
        match self {
            CollisionShape::Mesh { mesh, .. } => Some(mesh),
            _ => None,
        }
    }
}

/// One object of a cooked physics model: a set of convex hulls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicsModelObject {
    pub hulls: Vec<Vec<Vec3>>,
    pub mass: f32,
    pub surface_param: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicsModel {
    pub objects: Vec<PhysicsModelObject>,
}

/// Hooks invoked by the world while it simulates an object.
pub trait CollisionCallbacks: Send + Sync {
    fn pre_simulate(&mut self, _dt: f32) {}
    fn post_simulate(&mut self, _dt: f32) {}
    /// Called before the pair is resolved; the pair may be altered.
    fn on_pre_collide(&mut self, _pair: &mut ContactPair) {}
    fn on_collide(&mut self, _data: &CollisionPairData) {}
    fn on_start_move(&mut self) {}
    fn on_stop_move(&mut self) {}
}

/// Base collidable: shape, transform, filter masks and the per-step collision list.
pub struct CollisionObject {
    shape: Option<CollisionShape>,
    local_aabb: Aabb,
    aabb: Aabb,
    pub(crate) position: Vec3,
    pub(crate) orientation: Quat,
    pub contents: u32,
    pub collide_mask: u32,
    pub(crate) flags: u32,
    pub friction: f32,
    pub restitution: f32,
    pub erp: f32,
    pub user_data: u64,
    pub surf_param: i32,
    pub(crate) cell: Option<(i32, i32)>,
    pub(crate) cell_range: Option<CellRange>,
    pub(crate) collision_list: SmallVec<[CollisionPairData; PHYSICS_COLLISION_LIST_MAX]>,
    pub(crate) callbacks: Option<Box<dyn CollisionCallbacks>>,
    render_matrix: Mat4,
}

impl Default for CollisionObject {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionObject {
    pub fn new() -> Self {
        Self {
            shape: None,
            local_aabb: Aabb::default(),
            aabb: Aabb::default(),
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            contents: u32::MAX,
            collide_mask: u32::MAX,
            flags: ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY,
            friction: BODY_DEFAULT_FRICTION,
            restitution: BODY_DEFAULT_RESTITUTION,
            erp: 0.0,
            user_data: 0,
            surf_param: -1,
            cell: None,
            cell_range: None,
            collision_list: SmallVec::new(),
            callbacks: None,
            render_matrix: Mat4::IDENTITY,
        }
    }

    fn set_shape(&mut self, shape: CollisionShape, label: &str) -> bool {
        if self.shape.is_some() {
            log::error!("CollisionObject::{label} - object already has a shape, call destroy() first");
            return false;
        }

        self.local_aabb = ShapeUtil::local_aabb(&shape);
        self.shape = Some(shape);
        self.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
        self.update_bounding_box_transform();
        true
    }

    /// Builds the object from one entry of a physics model; several hulls become a compound.
    pub fn initialize_physics_model(&mut self, model: &PhysicsModel, index: usize) -> bool {
        let Some(object) = model.objects.get(index) else {
            log::error!(
                "CollisionObject::initialize_physics_model - index {index} out of {} objects",
                model.objects.len()
            );
            return false;
        };

        let mut hulls = object
            .hulls
            .iter()
            .filter(|hull| !hull.is_empty())
            .map(|hull| CollisionShape::Convex {
                vertices: hull.clone(),
            });

        let shape = match (hulls.next(), hulls.next()) {
            (None, _) => {
                log::error!("CollisionObject::initialize_physics_model - object {index} has no hulls");
                return false;
            }
            (Some(single), None) => single,
            (Some(first), Some(second)) => {
                let mut children = vec![(Vec3::ZERO, first), (Vec3::ZERO, second)];
                children.extend(hulls.map(|hull| (Vec3::ZERO, hull)));
                CollisionShape::Compound { children }
            }
        };

        if !self.set_shape(shape, "initialize_physics_model") {
            return false;
        }
        self.surf_param = object.surface_param;
        true
    }

    pub fn initialize_mesh(&mut self, mesh: Arc<TriangleMesh>, internal_edges: bool) -> bool {
        if mesh.triangle_count() == 0 {
            log::error!("CollisionObject::initialize_mesh - mesh has no triangles");
            return false;
        }
        self.set_shape(
            CollisionShape::Mesh {
                mesh,
                internal_edges,
            },
            "initialize_mesh",
        )
    }

    pub fn initialize_box(&mut self, mins: Vec3, maxs: Vec3) -> bool {
        let half_extents = (maxs - mins) * 0.5;
        if half_extents.min_element() <= 0.0 {
            log::error!("CollisionObject::initialize_box - degenerate box {mins} {maxs}");
            return false;
        }
        self.set_shape(
            CollisionShape::Box {
                center: (mins + maxs) * 0.5,
                half_extents,
            },
            "initialize_box",
        )
    }

    pub fn initialize_sphere(&mut self, radius: f32) -> bool {
        if radius <= 0.0 {
            log::error!("CollisionObject::initialize_sphere - radius must be positive, got {radius}");
            return false;
        }
        self.set_shape(CollisionShape::Sphere { radius }, "initialize_sphere")
    }

    /// Y-aligned cylinder; `half_height` is the extent from the center to a cap.
    pub fn initialize_cylinder(&mut self, radius: f32, half_height: f32) -> bool {
        if radius <= 0.0 || half_height <= 0.0 {
            log::error!("CollisionObject::initialize_cylinder - degenerate cylinder r={radius} h={half_height}");
            return false;
        }
        self.set_shape(
            CollisionShape::Cylinder {
                radius,
                half_height,
            },
            "initialize_cylinder",
        )
    }

    /// Releases the shape; the object may be initialized again afterwards.
    pub fn destroy(&mut self) {
        self.shape = None;
        self.local_aabb = Aabb::default();
        self.collision_list.clear();
    }

    pub fn shape(&self) -> Option<&CollisionShape> {
        self.shape.as_ref()
    }

    pub fn mesh(&self) -> Option<&TriangleMesh> {
        self.shape.as_ref().and_then(CollisionShape::mesh)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
        self.update_bounding_box_transform();
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
        self.update_bounding_box_transform();
    }

    pub fn set_transform(&mut self, position: Vec3, orientation: Quat) {
        self.position = position;
        self.orientation = orientation;
        self.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
        self.update_bounding_box_transform();
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.flags |= ObjectFlags::TRANSFORM_DIRTY | ObjectFlags::BOUNDBOX_DIRTY;
    }

    /// Recomputes the world AABB from the local one; a no-op until the transform changes.
    pub fn update_bounding_box_transform(&mut self) {
        if self.flags & ObjectFlags::BOUNDBOX_DIRTY == 0 {
            return;
        }
        self.flags &= !ObjectFlags::BOUNDBOX_DIRTY;

        self.aabb = math::rotate_aabb(&self.local_aabb, self.orientation)
            .expanded(Vec3::splat(PHYSICS_AABB_EXPAND))
            .translated(self.position);
    }

    /// Transformed AABB, valid once [`Self::update_bounding_box_transform`] ran.
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    pub fn local_aabb(&self) -> &Aabb {
        &self.local_aabb
    }

    pub fn render_matrix(&mut self) -> Mat4 {
        if self.flags & ObjectFlags::TRANSFORM_DIRTY != 0 {
            self.render_matrix =
                Mat4::from_rotation_translation(self.orientation, self.position);
            self.flags &= !ObjectFlags::TRANSFORM_DIRTY;
        }
        self.render_matrix
    }

    pub fn check_can_collide_with(&self, other: &CollisionObject) -> bool {
        (self.contents & other.collide_mask) != 0 || (self.collide_mask & other.contents) != 0
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_flags(&self, flags: u32) -> bool {
        self.flags & flags == flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags |= flags;
    }

    pub fn clear_flags(&mut self, flags: u32) {
        self.flags &= !flags;
    }

    pub fn is_ghost(&self) -> bool {
        self.flags & ObjectFlags::ISGHOST != 0
    }

    pub fn cell(&self) -> Option<(i32, i32)> {
        self.cell
    }

    pub fn cell_range(&self) -> Option<CellRange> {
        self.cell_range
    }

    pub fn collision_list(&self) -> &[CollisionPairData] {
        &self.collision_list
    }

    pub fn clear_collision_list(&mut self) {
        self.collision_list.clear();
    }

    /// Appends unless the list is full; overflow is dropped.
    pub(crate) fn push_collision(&mut self, data: CollisionPairData) {
        if self.flags & ObjectFlags::COLLISIONLIST != 0
            && self.collision_list.len() < PHYSICS_COLLISION_LIST_MAX
        {
            self.collision_list.push(data);
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Option<Box<dyn CollisionCallbacks>>) {
        self.callbacks = callbacks;
    }

    pub fn has_callbacks(&self) -> bool {
        self.callbacks.is_some()
    }

    pub(crate) fn take_callbacks(&mut self) -> Option<Box<dyn CollisionCallbacks>> {
        self.callbacks.take()
    }

    pub(crate) fn restore_callbacks(&mut self, callbacks: Option<Box<dyn CollisionCallbacks>>) {
        if self.callbacks.is_none() {
            self.callbacks = callbacks;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_twice_is_rejected_until_destroyed() {
        let mut object = CollisionObject::new();
        assert!(object.initialize_sphere(1.0));
        assert!(!object.initialize_box(Vec3::splat(-1.0), Vec3::ONE));

        object.destroy();
        assert!(object.initialize_box(Vec3::splat(-1.0), Vec3::ONE));
    }

    #[test]
    fn bounding_box_is_expanded_and_idempotent() {
        let mut object = CollisionObject::new();
        object.initialize_box(Vec3::splat(-1.0), Vec3::ONE);
        object.set_transform(Vec3::new(5.0, 2.0, -3.0), Quat::from_rotation_y(0.3));

        let first = *object.aabb();
        object.update_bounding_box_transform();
        let second = *object.aabb();
        assert_eq!(first, second);
        assert!(first.min.y <= 2.0 - 1.0 - PHYSICS_AABB_EXPAND + 1e-5);
    }

    #[test]
    fn collide_masks_are_checked_both_ways() {
        let mut a = CollisionObject::new();
        let mut b = CollisionObject::new();
        a.contents = 0b01;
        a.collide_mask = 0;
        b.contents = 0b10;
        b.collide_mask = 0b01;
        assert!(a.check_can_collide_with(&b));

        b.collide_mask = 0;
        assert!(!a.check_can_collide_with(&b));
    }

    #[test]
    fn mesh_shapes_survive_json() {
        let mesh = TriangleMesh::builder(
            vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            vec![[0, 2, 1]],
        )
        .material(3)
        .build();
        let shape = CollisionShape::Mesh {
            mesh: Arc::new(mesh),
            internal_edges: true,
        };

        let json = serde_json::to_string(&shape).expect("serializable");
        let CollisionShape::Mesh { mesh, internal_edges } =
            serde_json::from_str::<CollisionShape>(&json).expect("deserializable")
        else {
            panic!("mesh shape expected");
        };
        assert!(internal_edges);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.materials, vec![3]);
    }
}
