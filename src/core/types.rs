use glam::{Vec3, Vec3Swizzles};
use serde::{Deserialize, Serialize};

pub use glam::Vec2;

crate::define_handle!(
    /// Handle of a rigid body owned by the world.
    BodyId
);
crate::define_handle!(
    /// Handle of a static or ghost collision object owned by the world.
    ObjectId
);
crate::define_handle!(
    /// Handle of a constraint registered in the world.
    ConstraintId
);
crate::define_handle!(
    /// Handle of a controller registered in the world.
    ControllerId
);

/// Any collidable the world knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectHandle {
    Object(ObjectId),
    Body(BodyId),
}

impl ObjectHandle {
    pub fn as_body(self) -> Option<BodyId> {
        match self {
            ObjectHandle::Body(id) => Some(id),
            ObjectHandle::Object(_) => None,
        }
    }

    pub fn is_body(self) -> bool {
        matches!(self, ObjectHandle::Body(_))
    }
}

impl From<BodyId> for ObjectHandle {
    fn from(id: BodyId) -> Self {
        ObjectHandle::Body(id)
    }
}

impl From<ObjectId> for ObjectHandle {
    fn from(id: ObjectId) -> Self {
        ObjectHandle::Object(id)
    }
}

/// Flags stored in the low half of [`crate::CollisionObject::flags`].
pub struct ObjectFlags;

impl ObjectFlags {
    pub const NO_RAYCAST: u32 = 1 << 0;
    pub const ISGHOST: u32 = 1 << 1;
    pub const DISABLE_RESPONSE: u32 = 1 << 2;
    pub const DISABLE_COLLISION_CHECK: u32 = 1 << 3;
    pub const COLLISIONLIST: u32 = 1 << 4;
    pub const TRANSFORM_DIRTY: u32 = 1 << 5;
    pub const BOUNDBOX_DIRTY: u32 = 1 << 6;
}

/// Flags only meaningful on rigid bodies; they share the object flag word.
pub struct BodyFlags;

impl BodyFlags {
    pub const FROZEN: u32 = 1 << 16;
    pub const FORCE_FREEZE: u32 = 1 << 17;
    pub const PRESERVE_FORCES: u32 = 1 << 18;
    pub const DISABLE_DAMPING: u32 = 1 << 19;
    pub const NO_AUTO_FREEZE: u32 = 1 << 20;
    pub const INFINITE_MASS: u32 = 1 << 21;
    pub const IS_CAR: u32 = 1 << 22;
    pub const MOVEABLE: u32 = 1 << 24;
}

pub struct PairFlags;

impl PairFlags {
    pub const NO_SOUND: u32 = 1 << 0;
    pub const OBJECTA_STATIC: u32 = 1 << 1;
    pub const OBJECTA_NO_RESPONSE: u32 = 1 << 2;
    pub const OBJECTB_NO_RESPONSE: u32 = 1 << 3;
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.extend(p);
        }
        bounds
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn expanded(&self, amount: Vec3) -> Aabb {
        Aabb::new(self.min - amount, self.max + amount)
    }

    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.min.cmple(p).all() && self.max.cmpge(p).all()
    }

    pub fn min_xz(&self) -> Vec2 {
        self.min.xz()
    }

    pub fn max_xz(&self) -> Vec2 {
        self.max.xz()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}
