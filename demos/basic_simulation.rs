use eq_physics::*;

fn main() {
    let mut engine = PhysicsEngine::default();
    let world = engine.world_mut();

    let mut ground = CollisionObject::new();
    ground.initialize_box(Vec3::new(-20.0, -1.0, -20.0), Vec3::new(20.0, 0.0, 20.0));
    world.add_static_object(ground);

    let mut ball = RigidBody::new();
    ball.initialize_sphere(0.5);
    ball.set_mass(1.0);
    ball.set_position(Vec3::new(0.0, 3.0, 0.0));
    let ball = world.add_body_to_world(ball, true);

    for frame in 0..120 {
        engine.step(1.0 / 60.0);
        if frame % 20 == 0 {
            if let Some(body) = engine.world().body(ball) {
                println!("frame {frame}: y = {:.3} frozen = {}", body.position().y, body.is_frozen());
            }
        }
    }
}
