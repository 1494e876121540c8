//! Contact response, pairwise constraints, hinges and controllers.

pub mod constraints;
pub mod controller;
pub mod hinge;
pub mod solver;

pub use constraints::{Constraint, ConstraintFlags, MaxDistanceConstraint, PointConstraint};
pub use controller::PhysicsController;
pub use hinge::{HingeDesc, HingeJoint};
pub use solver::{apply_impulse_response_to, ContactBody};
