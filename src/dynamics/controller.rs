use crate::world::PhysicsWorld;

/// External driver stepped by the world before integration.
///
/// The world takes the controller out of its slot while calling into it, so
/// `update` may freely mutate bodies, constraints and other controllers.
pub trait PhysicsController: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn update(&mut self, dt: f32, world: &mut PhysicsWorld);

    fn added_to_world(&mut self, _world: &mut PhysicsWorld) {}

    fn removed_from_world(&mut self, _world: &mut PhysicsWorld) {}
}
