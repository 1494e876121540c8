use eq_physics::*;

const DT: f32 = 1.0 / 60.0;

fn floating_box(world: &mut PhysicsWorld, position: Vec3) -> BodyId {
    let mut body = RigidBody::new();
    assert!(body.initialize_box(Vec3::splat(-0.5), Vec3::splat(0.5)));
    body.set_mass(1.0);
    body.set_gravity(0.0);
    body.set_position(position);
    world.add_body_to_world(body, true)
}

fn anchor(world: &PhysicsWorld, id: BodyId, local: Vec3) -> Vec3 {
    let body = world.body(id).expect("body exists");
    body.position() + body.orientation() * local
}

fn step(world: &mut PhysicsWorld, steps: u32) {
    for i in 0..steps {
        world.simulate_step(DT, i, None);
    }
}

#[test]
fn point_constraint_drags_the_partner_along() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let a = floating_box(&mut world, Vec3::new(0.0, 5.0, 0.0));
    let b = floating_box(&mut world, Vec3::new(2.0, 5.0, 0.0));
    let (local_a, local_b) = (Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));

    world.add_constraint(PointConstraint::new(a, local_a, b, local_b, 0.0, 0.0, 0));
    world
        .body_mut(b)
        .expect("body exists")
        .set_linear_velocity(Vec3::new(0.0, 0.0, 3.0));

    step(&mut world, 60);

    let gap = anchor(&world, a, local_a).distance(anchor(&world, b, local_b));
    assert!(gap < 0.25, "anchors drifted apart by {gap}");
    assert!(world.body(a).expect("body exists").position().z > 0.1);
}

#[test]
fn max_distance_only_acts_at_full_length() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let a = floating_box(&mut world, Vec3::new(0.0, 5.0, 0.0));
    let b = floating_box(&mut world, Vec3::new(2.0, 5.0, 0.0));

    let rope = world.add_constraint(MaxDistanceConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 3.0, 0));
    world
        .body_mut(b)
        .expect("body exists")
        .set_linear_velocity(Vec3::new(4.0, 0.0, 0.0));

    // Slack rope: the first steps leave body a untouched.
    step(&mut world, 5);
    assert_eq!(world.body(a).expect("body exists").position(), Vec3::new(0.0, 5.0, 0.0));

    step(&mut world, 60);
    let length = anchor(&world, a, Vec3::ZERO).distance(anchor(&world, b, Vec3::ZERO));
    assert!(length < 3.2, "rope stretched to {length}");
    assert!(world.body(a).expect("body exists").position().x > 0.0);
    assert!(world.constraint(rope).expect("rope exists").is_enabled());
}

#[test]
fn hinge_keeps_its_pivot_together() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let frame = floating_box(&mut world, Vec3::new(0.0, 5.0, 0.0));
    let door = floating_box(&mut world, Vec3::new(2.0, 5.0, 0.0));

    let desc = HingeDesc {
        axis: Vec3::Z,
        position_rel0: Vec3::new(1.0, 0.0, 0.0),
        damping: 0.2,
        ..HingeDesc::default()
    };
    let hinge = world.add_hinge_joint(frame, door, &desc).expect("both bodies exist");
    for id in [frame, door] {
        assert_eq!(world.body(id).expect("body exists").constraints(), &[hinge]);
    }

    let joint = world.constraint(hinge).and_then(Constraint::as_hinge).expect("is a hinge");
    assert!(!joint.uses_limits());
    assert!(!joint.is_limit_enabled());

    world
        .body_mut(door)
        .expect("body exists")
        .set_linear_velocity(Vec3::new(0.0, 0.5, 0.0));
    step(&mut world, 30);

    let gap = anchor(&world, frame, Vec3::new(1.0, 0.0, 0.0)).distance(anchor(&world, door, Vec3::new(-1.0, 0.0, 0.0)));
    assert!(gap < 0.3, "hinge pivot opened by {gap}");
}

#[test]
fn hinge_limit_can_break_and_restore() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let frame = floating_box(&mut world, Vec3::ZERO);
    let door = floating_box(&mut world, Vec3::new(2.0, 0.0, 0.0));

    let desc = HingeDesc {
        axis: Vec3::Y,
        position_rel0: Vec3::new(1.0, 0.0, 0.0),
        forward_angle: 1.0,
        backward_angle: 0.0,
        ..HingeDesc::default()
    };
    let hinge = world.add_hinge_joint(frame, door, &desc).expect("both bodies exist");

    let joint = world
        .constraint_mut(hinge)
        .and_then(Constraint::as_hinge_mut)
        .expect("is a hinge");
    assert!(joint.uses_limits() && joint.is_limit_enabled());

    joint.break_joint();
    assert!(joint.is_broken());
    assert!(!joint.is_limit_enabled());
    assert!(joint.is_enabled());

    joint.restore();
    assert!(!joint.is_broken());
    assert!(joint.is_limit_enabled());
}

#[test]
fn hinge_needs_both_bodies() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let frame = floating_box(&mut world, Vec3::ZERO);
    let gone = floating_box(&mut world, Vec3::new(2.0, 0.0, 0.0));
    assert!(world.destroy_body(gone));

    assert!(world.add_hinge_joint(frame, gone, &HingeDesc::default()).is_none());
    assert_eq!(world.constraint_count(), 0);
}

#[test]
fn removing_a_constraint_detaches_both_bodies() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let a = floating_box(&mut world, Vec3::ZERO);
    let b = floating_box(&mut world, Vec3::new(2.0, 0.0, 0.0));

    let id = world.add_constraint(MaxDistanceConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 2.5, 0));
    let removed = world.remove_constraint(id).expect("was added");
    assert_eq!(removed.bodies(), (a, b));

    for body in [a, b] {
        assert!(world.body(body).expect("body exists").constraints().is_empty());
    }
    assert!(world.remove_constraint(id).is_none());
    assert!(!world.destroy_constraint(id));
}

#[test]
fn disabled_constraint_is_skipped() {
    let mut world = PhysicsWorld::default();
    world.init_grid();
    let a = floating_box(&mut world, Vec3::new(0.0, 5.0, 0.0));
    let b = floating_box(&mut world, Vec3::new(2.0, 5.0, 0.0));

    let id = world.add_constraint(MaxDistanceConstraint::new(a, Vec3::ZERO, b, Vec3::ZERO, 2.0, 0));
    world.constraint_mut(id).expect("exists").set_enabled(false);
    world
        .body_mut(b)
        .expect("body exists")
        .set_linear_velocity(Vec3::new(4.0, 0.0, 0.0));

    step(&mut world, 30);
    assert_eq!(world.body(a).expect("body exists").position(), Vec3::new(0.0, 5.0, 0.0));
}
