//! Core entities: handles and flags, collision objects, rigid bodies and triangle meshes.

pub mod collider;
pub mod mesh;
pub mod rigidbody;
pub mod types;

pub use collider::{CollisionCallbacks, CollisionObject, CollisionShape, PhysicsModel, PhysicsModelObject};
pub use mesh::{MeshBuilder, TriangleMesh};
pub use rigidbody::{compute_friction_velocity, RigidBody};
pub use types::{Aabb, BodyFlags, BodyId, ConstraintId, ControllerId, ObjectFlags, ObjectHandle, ObjectId, PairFlags};
