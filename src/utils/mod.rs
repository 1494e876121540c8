//! Utility helpers: generational arenas, scoped timers, debug drawing and math extensions.

pub mod allocator;
pub mod debug;
pub mod logging;
pub mod math;

pub use allocator::{Arena, ArenaHandle, EntityId};
pub use debug::{DebugColor, DebugDraw, LineCollector, NullDebugDraw};
pub use math::*;
