//! Collision detection: surface parameters, XZ grid broad-phase, narrow-phase and queries.

pub mod broadphase;
pub mod contact;
pub mod narrowphase;
pub mod queries;
pub mod shapes;
pub mod surface;

pub use broadphase::{BroadphaseGrid, CellRange, GridCell};
pub use contact::{CollisionPairData, ContactPair, ManifoldPoint, ManifoldResult};
pub use narrowphase::{GjkNarrowPhase, MaterialFilter, NarrowPhase, RayHit, ShapeInstance};
pub use queries::{
    check_allow_contact_test, CollisionFilter, CollisionInfo, FilterEntry, FilterFlags, FilterType,
};
pub use shapes::ShapeUtil;
pub use surface::{SurfaceParam, SurfaceParamTable};
