use super::PhysicsWorld;
use crate::utils::debug::{DebugColor, DebugDraw};

/// Mode that draws the broadphase grid and nothing else.
const GRID_ONLY_MODE: i32 = 5;
/// Mode that keeps world-space bounds even though it is above 1.
const BOUNDS_MODE: i32 = 4;

impl PhysicsWorld {
    /// Draws the world with the configured `debug_draw_mode`.
    pub fn debug_draw(&self, draw: &mut dyn DebugDraw) {
        self.debug_draw_bodies(self.config.debug_draw_mode, draw);
    }

    /// Mode 5 draws only the grid. Other modes draw the bodies, as oriented
    /// boxes for 1-3 and above 5, as world bounds otherwise. From mode 2 the
    /// grid is added and from mode 3 the static objects.
    pub fn debug_draw_bodies(&self, mode: i32, draw: &mut dyn DebugDraw) {
        let grid = self.collision.grid.as_ref();
        if mode == GRID_ONLY_MODE {
            if let Some(grid) = grid {
                grid.debug_render(draw);
            }
            return;
        }

        let oriented = mode >= 1 && mode != BOUNDS_MODE;
        for (_, body) in self.bodies() {
            let color = if body.is_frozen() {
                DebugColor::GREEN
            } else {
                DebugColor::CYAN
            };
            if oriented {
                draw.oriented_box(body.local_aabb(), body.position(), body.orientation(), color);
            } else {
                draw.aabb(body.aabb(), color);
            }
        }

        if mode >= 2 {
            if let Some(grid) = grid {
                grid.debug_render(draw);
            }
        }

        if mode >= 3 {
            for id in &self.static_objects {
                if let Some(object) = self.objects.get(*id) {
                    draw.aabb(object.aabb(), DebugColor::YELLOW);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{collider::CollisionObject, rigidbody::RigidBody},
        utils::debug::LineCollector,
    };
    use glam::Vec3;

    fn populated_world() -> PhysicsWorld {
        let mut world = PhysicsWorld::default();
        world.init_grid();

        let mut ground = CollisionObject::new();
        assert!(ground.initialize_box(Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0)));
        world.add_static_object(ground);

        let mut body = RigidBody::new();
        assert!(body.initialize_sphere(0.5));
        body.set_mass(1.0);
        body.set_position(Vec3::new(0.0, 2.0, 0.0));
        world.add_body_to_world(body, true);
        world
    }

    fn count(world: &PhysicsWorld, mode: i32, color: DebugColor) -> usize {
        let mut lines = LineCollector::default();
        world.debug_draw_bodies(mode, &mut lines);
        lines.lines.iter().filter(|(_, _, c)| *c == color).count()
    }

    #[test]
    fn modes_select_what_gets_drawn() {
        let world = populated_world();

        assert_eq!(count(&world, 0, DebugColor::CYAN), 12);
        assert_eq!(count(&world, 1, DebugColor::GRID), 0);
        assert!(count(&world, 2, DebugColor::GRID) > 0);
        assert_eq!(count(&world, 2, DebugColor::YELLOW), 0);
        assert_eq!(count(&world, 3, DebugColor::YELLOW), 12);

        assert_eq!(count(&world, 5, DebugColor::CYAN), 0);
        assert!(count(&world, 5, DebugColor::GRID) > 0);
    }
}
