use eq_physics::*;

fn main() {
    let mut world = PhysicsWorld::default();
    world.init_grid();

    let mut wall = CollisionObject::new();
    wall.initialize_box(Vec3::new(4.0, -2.0, -2.0), Vec3::new(5.0, 2.0, 2.0));
    world.add_static_object(wall);

    let mut ball = RigidBody::new();
    ball.initialize_sphere(1.0);
    ball.set_mass(1.0);
    ball.set_position(Vec3::new(0.0, 0.0, 6.0));
    world.add_body_to_world(ball, false);

    let rays = [
        (Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)),
        (Vec3::new(-5.0, 0.0, 6.0), Vec3::new(5.0, 0.0, 6.0)),
        (Vec3::new(0.0, 5.0, -8.0), Vec3::new(0.0, 5.0, 8.0)),
    ];
    for (start, end) in rays {
        match world.test_line_collision(start, end, u32::MAX, None) {
            Some(hit) => println!("{start} -> {end}: hit {:?} at {} (fract {:.3})", hit.hit_object, hit.position, hit.fract),
            None => println!("{start} -> {end}: clear"),
        }
    }

    let sweep = world.test_convex_sweep_collision(
        &CollisionShape::Sphere { radius: 0.5 },
        Quat::IDENTITY,
        Vec3::ZERO,
        Vec3::new(10.0, 0.0, 0.0),
        u32::MAX,
        None,
    );
    println!("sphere sweep: {:?}", sweep.map(|hit| hit.fract));
}
