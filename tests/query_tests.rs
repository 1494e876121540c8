use std::sync::Arc;

use approx::assert_relative_eq;
use eq_physics::*;

fn world_with_targets() -> (PhysicsWorld, ObjectId, BodyId) {
    let mut world = PhysicsWorld::default();
    world.init_grid();

    let mut wall = CollisionObject::new();
    assert!(wall.initialize_box(Vec3::new(9.0, -5.0, -5.0), Vec3::new(10.0, 5.0, 5.0)));
    let wall = world.add_static_object(wall);

    let mut ball = RigidBody::new();
    assert!(ball.initialize_sphere(1.0));
    ball.set_mass(1.0);
    ball.set_position(Vec3::new(0.0, 0.0, 5.0));
    let ball = world.add_body_to_world(ball, false);

    (world, wall, ball)
}

fn floor_mesh(material: i32) -> CollisionObject {
    let mesh = TriangleMesh::builder(
        vec![
            Vec3::new(-5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(-5.0, 0.0, 5.0),
        ],
        vec![[0, 2, 1], [0, 3, 2]],
    )
    .material(material)
    .build();

    let mut object = CollisionObject::new();
    assert!(object.initialize_mesh(Arc::new(mesh), false));
    object
}

#[test]
fn ray_hits_static_box() {
    let (world, wall, _) = world_with_targets();
    let info = world
        .test_line_collision(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), u32::MAX, None)
        .expect("wall blocks the ray");

    assert_relative_eq!(info.fract, 0.45, epsilon = 1e-4);
    assert_relative_eq!(info.position.x, 9.0, epsilon = 1e-3);
    assert_relative_eq!(info.normal.x, -1.0, epsilon = 1e-4);
    assert_eq!(info.hit_object, Some(ObjectHandle::Object(wall)));
    assert_eq!(info.material_index, -1);
}

#[test]
fn ray_hits_dynamic_sphere() {
    let (world, _, ball) = world_with_targets();
    let info = world
        .test_line_collision(Vec3::new(-5.0, 0.0, 5.0), Vec3::new(5.0, 0.0, 5.0), u32::MAX, None)
        .expect("sphere blocks the ray");

    assert_relative_eq!(info.fract, 0.4, epsilon = 1e-4);
    assert_relative_eq!(info.normal.x, -1.0, epsilon = 1e-4);
    assert_eq!(info.hit_object, Some(ObjectHandle::Body(ball)));

    let ignore_ball = CollisionFilter::excluding_body(ball);
    assert!(world
        .test_line_collision(Vec3::new(-5.0, 0.0, 5.0), Vec3::new(5.0, 0.0, 5.0), u32::MAX, Some(&ignore_ball))
        .is_none());
}

#[test]
fn closest_of_several_hits_wins() {
    let (mut world, wall, _) = world_with_targets();
    let mut near = CollisionObject::new();
    assert!(near.initialize_box(Vec3::new(4.0, -1.0, -1.0), Vec3::new(5.0, 1.0, 1.0)));
    let near = world.add_static_object(near);

    let info = world
        .test_line_collision(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), u32::MAX, None)
        .expect("something blocks the ray");
    assert_eq!(info.hit_object, Some(ObjectHandle::Object(near)));
    assert_relative_eq!(info.fract, 0.2, epsilon = 1e-4);

    let mut skip_near = CollisionFilter::default();
    skip_near.add_object(ObjectHandle::Object(near));
    let info = world
        .test_line_collision(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), u32::MAX, Some(&skip_near))
        .expect("wall still blocks the ray");
    assert_eq!(info.hit_object, Some(ObjectHandle::Object(wall)));
}

#[test]
fn ray_hits_mesh_and_reports_its_material() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    world
        .load_surface_params_json(r#"[{ "name": "default" }, { "name": "grass", "friction": 0.9, "contentsMask": 1 }]"#)
        .expect("valid surface json");
    let grass = world.surface_params().find_id("grass").expect("grass loaded");
    let floor = world.add_static_object(floor_mesh(grass));

    let info = world
        .test_line_collision(Vec3::new(2.0, 4.0, 1.0), Vec3::new(2.0, -4.0, 1.0), 1, None)
        .expect("ray crosses the floor");
    assert_relative_eq!(info.fract, 0.5, epsilon = 1e-4);
    assert_relative_eq!(info.normal.y, 1.0, epsilon = 1e-4);
    assert_eq!(info.material_index, grass);
    assert_eq!(info.hit_object, Some(ObjectHandle::Object(floor)));

    // Contents the surface does not cover pass through it.
    assert!(world
        .test_line_collision(Vec3::new(2.0, 4.0, 1.0), Vec3::new(2.0, -4.0, 1.0), 0b11, None)
        .is_none());
}

#[test]
fn degenerate_ray_hits_nothing() {
    let (world, _, _) = world_with_targets();
    let point = Vec3::new(9.5, 0.0, 0.0);
    assert!(world.test_line_collision(point, point, u32::MAX, None).is_none());
    assert!(world.test_line_collision(Vec3::ZERO, Vec3::ZERO, u32::MAX, None).is_none());
}

#[test]
fn queries_without_grid_miss() {
    let world = PhysicsWorld::default();
    assert!(world
        .test_line_collision(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), u32::MAX, None)
        .is_none());
}

#[test]
fn sphere_sweep_stops_short_of_the_wall() {
    let (world, wall, _) = world_with_targets();
    let shape = CollisionShape::Sphere { radius: 1.0 };
    let info = world
        .test_convex_sweep_collision(
            &shape,
            Quat::IDENTITY,
            Vec3::ZERO,
            Vec3::new(20.0, 0.0, 0.0),
            u32::MAX,
            None,
        )
        .expect("wall blocks the sweep");

    // Sphere surface touches x = 9 when its center reaches x = 8.
    assert_relative_eq!(info.fract, 0.4, epsilon = 0.01);
    assert_eq!(info.hit_object, Some(ObjectHandle::Object(wall)));
    assert!(info.normal.x < -0.9);
}

#[test]
fn batch_matches_single_queries() {
    let (world, _, _) = world_with_targets();
    let rays: Vec<(Vec3, Vec3)> = (0..16)
        .map(|i| {
            let z = i as f32 - 8.0;
            (Vec3::new(0.0, 0.0, z), Vec3::new(20.0, 0.0, z))
        })
        .collect();

    let batch = world.test_line_collisions_batch(&rays, u32::MAX, None);
    assert_eq!(batch.len(), rays.len());
    for ((start, end), result) in rays.iter().zip(&batch) {
        assert_eq!(*result, world.test_line_collision(*start, *end, u32::MAX, None));
    }
    assert!(batch.iter().filter(|r| r.is_some()).count() >= 9);
}
