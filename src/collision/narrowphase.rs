use glam::{Quat, Vec3};

use super::{contact::ManifoldResult, shapes::ShapeUtil};
use crate::core::{collider::CollisionShape, mesh::TriangleMesh, types::Aabb};

/// Accepts or rejects a mesh triangle by its surface parameter id.
pub type MaterialFilter<'a> = &'a dyn Fn(i32) -> bool;

/// A shape placed in the world.
#[derive(Debug, Clone, Copy)]
pub struct ShapeInstance<'a> {
    pub shape: &'a CollisionShape,
    pub position: Vec3,
    pub orientation: Quat,
}

impl<'a> ShapeInstance<'a> {
    pub fn new(shape: &'a CollisionShape, position: Vec3, orientation: Quat) -> Self {
        Self {
            shape,
            position,
            orientation,
        }
    }

    pub fn world_aabb(&self) -> Aabb {
        crate::utils::math::rotate_aabb(&ShapeUtil::local_aabb(self.shape), self.orientation)
            .translated(self.position)
    }
}

/// Closest hit of a ray or sweep against one shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Fraction of the segment, in `[0, 1]`.
    pub fract: f32,
    pub position: Vec3,
    /// Surface normal facing back along the segment.
    pub normal: Vec3,
    pub material: i32,
}

/// Geometry queries the world needs from a collision backend.
pub trait NarrowPhase: Send + Sync {
    /// Contacts between `a` and `b`. Normals point from `b` toward `a`, distances
    /// are negative when penetrating and positions lie on `a`.
    fn collide(
        &self,
        a: &ShapeInstance,
        b: &ShapeInstance,
        accept: MaterialFilter,
        out: &mut ManifoldResult,
    );

    fn ray_cast(
        &self,
        target: &ShapeInstance,
        start: Vec3,
        end: Vec3,
        accept: MaterialFilter,
    ) -> Option<RayHit>;

    /// Sweeps the convex `cast` shape with fixed `rotation` from `start` to `end`.
    fn convex_cast(
        &self,
        cast: &CollisionShape,
        rotation: Quat,
        start: Vec3,
        end: Vec3,
        target: &ShapeInstance,
        accept: MaterialFilter,
    ) -> Option<RayHit>;
}

#[derive(Debug, Clone, Copy)]
enum Primitive<'a> {
    Point,
    Sphere(f32),
    Box { center: Vec3, half_extents: Vec3 },
    Cylinder { radius: f32, half_height: f32 },
    Hull(&'a [Vec3]),
    /// Vertices already in world space.
    Triangle([Vec3; 3]),
}

/// A convex primitive with its world transform.
#[derive(Debug, Clone, Copy)]
struct Placed<'a> {
    primitive: Primitive<'a>,
    position: Vec3,
    orientation: Quat,
}

impl Placed<'_> {
    fn support(&self, direction: Vec3) -> Vec3 {
        match self.primitive {
            Primitive::Point => self.position,
            Primitive::Sphere(radius) => self.position + direction.normalize_or_zero() * radius,
            Primitive::Box {
                center,
                half_extents,
            } => {
                let local_dir = self.orientation.conjugate() * direction;
                let local = center
                    + Vec3::new(
                        if local_dir.x >= 0.0 { half_extents.x } else { -half_extents.x },
                        if local_dir.y >= 0.0 { half_extents.y } else { -half_extents.y },
                        if local_dir.z >= 0.0 { half_extents.z } else { -half_extents.z },
                    );
                self.position + self.orientation * local
            }
            Primitive::Cylinder {
                radius,
                half_height,
            } => {
                let axis = self.orientation * Vec3::Y;
                let dir = direction.normalize_or_zero();
                let lateral = (dir - axis * dir.dot(axis)).normalize_or_zero();
                let axial = if dir.dot(axis) >= 0.0 { half_height } else { -half_height };
                self.position + lateral * radius + axis * axial
            }
            Primitive::Hull(vertices) => {
                let local_dir = self.orientation.conjugate() * direction;
                let mut best = Vec3::ZERO;
                let mut best_dot = f32::NEG_INFINITY;
                for v in vertices {
                    let d = v.dot(local_dir);
                    if d > best_dot {
                        best_dot = d;
                        best = *v;
                    }
                }
                self.position + self.orientation * best
            }
            Primitive::Triangle(vertices) => {
                let mut best = vertices[0];
                for v in &vertices[1..] {
                    if v.dot(direction) > best.dot(direction) {
                        best = *v;
                    }
                }
                best
            }
        }
    }

    fn center(&self) -> Vec3 {
        match self.primitive {
            Primitive::Triangle([a, b, c]) => (a + b + c) / 3.0,
            Primitive::Box { center, .. } => self.position + self.orientation * center,
            _ => self.position,
        }
    }

    fn at(&self, position: Vec3) -> Self {
        Self {
            position,
            ..*self
        }
    }
}

/// Splits a convex or compound shape into placed primitives.
fn decompose<'a>(shape: &'a CollisionShape, position: Vec3, orientation: Quat, out: &mut Vec<Placed<'a>>) {
    let primitive = match shape {
        CollisionShape::Sphere { radius } => Primitive::Sphere(*radius),
        CollisionShape::Box {
            center,
            half_extents,
        } => Primitive::Box {
            center: *center,
            half_extents: *half_extents,
        },
        CollisionShape::Cylinder {
            radius,
            half_height,
        } => Primitive::Cylinder {
            radius: *radius,
            half_height: *half_height,
        },
        CollisionShape::Convex { vertices } => Primitive::Hull(vertices),
        CollisionShape::Compound { children } => {
            for (offset, child) in children {
                decompose(child, position + orientation * *offset, orientation, out);
            }
            return;
        }
        CollisionShape::Mesh { .. } => return,
    };
    out.push(Placed {
        primitive,
        position,
        orientation,
    });
}

/// Gilbert-Johnson-Keerthi intersection test between two placed convex primitives.
struct Gjk;

impl Gjk {
    const MAX_ITERATIONS: usize = 32;
    const EPSILON: f32 = 1e-6;

    fn minkowski(a: &Placed, b: &Placed, direction: Vec3) -> Vec3 {
        a.support(direction) - b.support(-direction)
    }

    /// Returns the enclosing simplex when the shapes overlap.
    fn intersect(a: &Placed, b: &Placed) -> Option<Vec<Vec3>> {
        let mut simplex: Vec<Vec3> = Vec::with_capacity(4);
        let mut direction = b.center() - a.center();
        if direction.length_squared() < Self::EPSILON {
            direction = Vec3::X;
        }

        for _ in 0..Self::MAX_ITERATIONS {
            let point = Self::minkowski(a, b, direction);
            if point.dot(direction) < 0.0 {
                return None;
            }

            simplex.push(point);
            if Self::contains_origin(&mut simplex, &mut direction) {
                return Some(simplex);
            }
            if direction.length_squared() < Self::EPSILON * Self::EPSILON {
                return None;
            }
        }

        None
    }

    fn contains_origin(simplex: &mut Vec<Vec3>, direction: &mut Vec3) -> bool {
        match simplex.len() {
            1 => {
                *direction = -simplex[0];
                false
            }
            2 => {
                let a = simplex[1];
                let b = simplex[0];
                let ab = b - a;
                let ao = -a;

                let dir = ab.cross(ao).cross(ab);
                if dir.length_squared() < Self::EPSILON {
                    // Origin on the line AB.
                    let axis = if ab.x.abs() < 0.1 { Vec3::X } else { Vec3::Y };
                    *direction = ab.cross(axis);
                } else {
                    *direction = dir;
                }
                false
            }
            3 => {
                let a = simplex[2];
                let b = simplex[1];
                let c = simplex[0];
                let ab = b - a;
                let ac = c - a;
                let ao = -a;
                let abc = ab.cross(ac);

                if abc.cross(ac).dot(ao) > 0.0 {
                    simplex.remove(1);
                    *direction = ac.cross(ao).cross(ac);
                } else if ab.cross(abc).dot(ao) > 0.0 {
                    simplex.remove(0);
                    *direction = ab.cross(ao).cross(ab);
                } else if abc.length_squared() < Self::EPSILON {
                    *direction = Vec3::Y;
                } else if abc.dot(ao) > 0.0 {
                    *direction = abc;
                } else {
                    *direction = -abc;
                }
                false
            }
            4 => {
                let a = simplex[3];
                let b = simplex[2];
                let c = simplex[1];
                let d = simplex[0];
                let ab = b - a;
                let ac = c - a;
                let ad = d - a;
                let ao = -a;
                let mut abc = ab.cross(ac);
                let mut acd = ac.cross(ad);
                let mut adb = ad.cross(ab);

                // Orient the face normals away from the opposite vertex.
                if abc.dot(ad) > 0.0 {
                    abc = -abc;
                }
                if acd.dot(ab) > 0.0 {
                    acd = -acd;
                }
                if adb.dot(ac) > 0.0 {
                    adb = -adb;
                }

                if abc.dot(ao) > 0.0 {
                    simplex.remove(0);
                    *direction = abc;
                    false
                } else if acd.dot(ao) > 0.0 {
                    simplex.remove(2);
                    *direction = acd;
                    false
                } else if adb.dot(ao) > 0.0 {
                    simplex.remove(1);
                    *direction = adb;
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }
}

/// Expanding Polytope Algorithm; yields penetration depth and the A to B normal.
struct Epa;

impl Epa {
    const MAX_ITERATIONS: usize = 32;
    const EPSILON: f32 = 1e-5;

    fn penetration(simplex: &[Vec3], a: &Placed, b: &Placed) -> (f32, Vec3) {
        let fallback = || {
            let n = (b.center() - a.center()).normalize_or_zero();
            (0.01, if n == Vec3::ZERO { Vec3::X } else { n })
        };

        if simplex.len() < 4 {
            return fallback();
        }

        let mut polytope = vec![simplex[0], simplex[1], simplex[2], simplex[3]];
        let mut faces = Self::build_initial_faces(&polytope);

        for _ in 0..Self::MAX_ITERATIONS {
            let Some((min_dist, normal)) = Self::find_closest_face(&polytope, &faces) else {
                return fallback();
            };

            let support = Gjk::minkowski(a, b, normal);
            let distance = support.dot(normal);
            if distance - min_dist < Self::EPSILON {
                return (min_dist.max(0.0), normal);
            }

            Self::expand_polytope(&mut polytope, &mut faces, support);
        }

        match Self::find_closest_face(&polytope, &faces) {
            Some((min_dist, normal)) => (min_dist.max(0.0), normal),
            None => fallback(),
        }
    }

    fn build_initial_faces(polytope: &[Vec3]) -> Vec<[usize; 3]> {
        let mut faces = vec![[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]];
        let centroid = polytope.iter().copied().sum::<Vec3>() / polytope.len() as f32;

        for face in &mut faces {
            let ab = polytope[face[1]] - polytope[face[0]];
            let ac = polytope[face[2]] - polytope[face[0]];
            if ab.cross(ac).dot(polytope[face[0]] - centroid) < 0.0 {
                face.swap(1, 2);
            }
        }
        faces
    }

    fn find_closest_face(polytope: &[Vec3], faces: &[[usize; 3]]) -> Option<(f32, Vec3)> {
        let mut best: Option<(f32, Vec3)> = None;
        for &[a, b, c] in faces {
            let normal = (polytope[b] - polytope[a])
                .cross(polytope[c] - polytope[a])
                .normalize_or_zero();
            if normal == Vec3::ZERO {
                continue;
            }
            let dist = polytope[a].dot(normal);
            if best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, normal));
            }
        }
        best
    }

    fn expand_polytope(polytope: &mut Vec<Vec3>, faces: &mut Vec<[usize; 3]>, support: Vec3) {
        let new_index = polytope.len();
        polytope.push(support);

        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut i = 0;
        while i < faces.len() {
            let [a, b, c] = faces[i];
            let normal = (polytope[b] - polytope[a]).cross(polytope[c] - polytope[a]);
            if normal.dot(support - polytope[a]) > 0.0 {
                for edge in [(a, b), (b, c), (c, a)] {
                    match edges.iter().position(|&(u, v)| (v, u) == edge) {
                        Some(shared) => {
                            edges.swap_remove(shared);
                        }
                        None => edges.push(edge),
                    }
                }
                faces.swap_remove(i);
            } else {
                i += 1;
            }
        }

        for (u, v) in edges {
            faces.push([u, v, new_index]);
        }
    }
}

/// Penetration of two placed primitives as `(point on a, normal b->a, signed distance)`.
fn convex_contact(a: &Placed, b: &Placed) -> Option<(Vec3, Vec3, f32)> {
    let simplex = Gjk::intersect(a, b)?;
    let (depth, normal_ab) = Epa::penetration(&simplex, a, b);
    let position = a.support(normal_ab);
    Some((position, -normal_ab, -depth))
}

fn sphere_sphere(ca: Vec3, ra: f32, cb: Vec3, rb: f32) -> Option<(Vec3, Vec3, f32)> {
    let delta = ca - cb;
    let dist = delta.length();
    let separation = dist - ra - rb;
    if separation > 0.0 {
        return None;
    }
    let normal = if dist > 1e-6 { delta / dist } else { Vec3::Y };
    Some((ca - normal * ra, normal, separation))
}

/// Sphere against box; normal points from the box toward the sphere.
fn sphere_box(
    sphere_center: Vec3,
    radius: f32,
    box_position: Vec3,
    box_orientation: Quat,
    box_center: Vec3,
    half_extents: Vec3,
) -> Option<(Vec3, Vec3, f32)> {
    let local = box_orientation.conjugate() * (sphere_center - box_position) - box_center;
    let clamped = local.clamp(-half_extents, half_extents);

    let (closest, local_normal, separation) = if clamped != local {
        let delta = local - clamped;
        let dist = delta.length();
        if dist > radius {
            return None;
        }
        (clamped, delta / dist, dist - radius)
    } else {
        // Center inside the box: push out through the nearest face.
        let to_face = half_extents - local.abs();
        let axis = if to_face.x <= to_face.y && to_face.x <= to_face.z {
            0
        } else if to_face.y <= to_face.z {
            1
        } else {
            2
        };
        let mut normal = Vec3::ZERO;
        normal[axis] = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut surface = local;
        surface[axis] = half_extents[axis] * normal[axis];
        (surface, normal, -to_face[axis] - radius)
    };

    let normal = box_orientation * local_normal;
    let closest_world = box_position + box_orientation * (closest + box_center);
    Some((closest_world, normal, separation))
}

fn closest_point_on_triangle(p: Vec3, [a, b, c]: [Vec3; 3]) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Default backend: analytic sphere paths plus GJK/EPA for everything convex.
#[derive(Debug, Default, Clone, Copy)]
pub struct GjkNarrowPhase;

impl GjkNarrowPhase {
    const SWEEP_MAX_STEPS: usize = 128;
    const SWEEP_BISECTIONS: usize = 16;

    pub fn new() -> Self {
        Self
    }

    fn collide_convex(a: &Placed, b: &Placed) -> Option<(Vec3, Vec3, f32)> {
        match (a.primitive, b.primitive) {
            (Primitive::Sphere(ra), Primitive::Sphere(rb)) => {
                sphere_sphere(a.position, ra, b.position, rb)
            }
            (
                Primitive::Sphere(radius),
                Primitive::Box {
                    center,
                    half_extents,
                },
            ) => {
                let (_, normal, dist) =
                    sphere_box(a.position, radius, b.position, b.orientation, center, half_extents)?;
                Some((a.position - normal * radius, normal, dist))
            }
            (
                Primitive::Box {
                    center,
                    half_extents,
                },
                Primitive::Sphere(radius),
            ) => {
                let (closest, normal, dist) =
                    sphere_box(b.position, radius, a.position, a.orientation, center, half_extents)?;
                Some((closest, -normal, dist))
            }
            (Primitive::Sphere(radius), Primitive::Triangle(tri)) => {
                let closest = closest_point_on_triangle(a.position, tri);
                let delta = a.position - closest;
                let dist = delta.length();
                if dist > radius || dist < 1e-6 {
                    return convex_contact(a, b);
                }
                let normal = delta / dist;
                Some((a.position - normal * radius, normal, dist - radius))
            }
            _ => convex_contact(a, b),
        }
    }

    /// Convex pieces of `convex` against every triangle of `mesh` near them.
    fn collide_mesh(
        convex: &[Placed],
        mesh_instance: &ShapeInstance,
        mesh: &TriangleMesh,
        internal_edges: bool,
        accept: MaterialFilter,
        mesh_is_a: bool,
        out: &mut ManifoldResult,
    ) {
        let inv = mesh_instance.orientation.conjugate();
        for piece in convex {
            let mut bounds = Aabb::empty();
            for corner in Self::placed_aabb(piece).corners() {
                bounds.extend(inv * (corner - mesh_instance.position));
            }

            for index in 0..mesh.triangle_count() {
                let local = mesh.triangle(index);
                if !Aabb::from_points(&local).intersects(&bounds) {
                    continue;
                }
                let material = mesh.material(index);
                if !accept(material) {
                    continue;
                }

                let world = local.map(|v| mesh_instance.position + mesh_instance.orientation * v);
                let triangle = Placed {
                    primitive: Primitive::Triangle(world),
                    position: Vec3::ZERO,
                    orientation: Quat::IDENTITY,
                };

                // Narrow phase always runs convex-first so the normal faces the convex piece.
                let Some((position, normal, distance)) = Self::collide_convex(piece, &triangle) else {
                    continue;
                };

                let surface_point = position - normal * distance;
                let local_point = inv * (surface_point - mesh_instance.position);
                let local_normal = mesh.adjust_contact_normal(index, local_point, inv * normal, internal_edges);
                let normal = mesh_instance.orientation * local_normal;

                if mesh_is_a {
                    out.add_point(surface_point, -normal, distance, material);
                } else {
                    out.add_point(position, normal, distance, material);
                }
            }
        }
    }

    fn placed_aabb(piece: &Placed) -> Aabb {
        let mut bounds = Aabb::empty();
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            bounds.extend(piece.support(axis));
            bounds.extend(piece.support(-axis));
        }
        bounds
    }

    fn ray_placed(piece: &Placed, start: Vec3, end: Vec3) -> Option<(f32, Vec3)> {
        let dir = end - start;
        match piece.primitive {
            Primitive::Sphere(radius) => ray_sphere(start, dir, piece.position, radius),
            Primitive::Box {
                center,
                half_extents,
            } => {
                let inv = piece.orientation.conjugate();
                let local_start = inv * (start - piece.position) - center;
                let (t, n) = ray_box_local(local_start, inv * dir, half_extents)?;
                Some((t, piece.orientation * n))
            }
            Primitive::Cylinder {
                radius,
                half_height,
            } => {
                let inv = piece.orientation.conjugate();
                let local_start = inv * (start - piece.position);
                let (t, n) = ray_cylinder_local(local_start, inv * dir, radius, half_height)?;
                Some((t, piece.orientation * n))
            }
            Primitive::Triangle(tri) => ray_triangle(start, dir, tri),
            Primitive::Hull(_) | Primitive::Point => {
                let point = Placed {
                    primitive: Primitive::Point,
                    position: start,
                    orientation: Quat::IDENTITY,
                };
                let (t, _, normal) = Self::sweep_placed(&point, dir, piece)?;
                Some((t, normal))
            }
        }
    }

    /// Time of impact of `moving` travelling by `displacement` against `target`.
    /// Returns `(fract, contact on target, normal from target toward moving)`.
    fn sweep_placed(moving: &Placed, displacement: Vec3, target: &Placed) -> Option<(f32, Vec3, Vec3)> {
        let length = displacement.length();
        let mut extent = Self::placed_aabb(moving).size().min_element();
        if extent < 1e-4 {
            extent = Self::placed_aabb(target).size().min_element();
        }
        let steps = if extent > 1e-4 {
            ((length / (extent * 0.5)).ceil() as usize).clamp(1, Self::SWEEP_MAX_STEPS)
        } else {
            Self::SWEEP_MAX_STEPS
        };

        let hits = |t: f32| Gjk::intersect(&moving.at(moving.position + displacement * t), target).is_some();

        if hits(0.0) {
            return Self::impact(moving, displacement, target, 0.0);
        }

        let mut free = 0.0;
        for step in 1..=steps {
            let t = step as f32 / steps as f32;
            if hits(t) {
                let mut blocked = t;
                for _ in 0..Self::SWEEP_BISECTIONS {
                    let mid = (free + blocked) * 0.5;
                    if hits(mid) {
                        blocked = mid;
                    } else {
                        free = mid;
                    }
                }
                return Self::impact(moving, displacement, target, blocked);
            }
            free = t;
        }
        None
    }

    fn impact(moving: &Placed, displacement: Vec3, target: &Placed, t: f32) -> Option<(f32, Vec3, Vec3)> {
        let placed = moving.at(moving.position + displacement * t);
        let (position, normal, distance) = Self::collide_convex(&placed, target)?;
        let normal = if normal.dot(displacement) > 0.0 && t > 0.0 { -normal } else { normal };
        Some((t, position - normal * distance, normal))
    }
}

impl NarrowPhase for GjkNarrowPhase {
    fn collide(
        &self,
        a: &ShapeInstance,
        b: &ShapeInstance,
        accept: MaterialFilter,
        out: &mut ManifoldResult,
    ) {
        match (a.shape, b.shape) {
            (CollisionShape::Mesh { .. }, CollisionShape::Mesh { .. }) => {}
            (
                CollisionShape::Mesh {
                    mesh,
                    internal_edges,
                },
                _,
            ) => {
                let mut pieces = Vec::new();
                decompose(b.shape, b.position, b.orientation, &mut pieces);
                Self::collide_mesh(&pieces, a, mesh, *internal_edges, accept, true, out);
            }
            (
                _,
                CollisionShape::Mesh {
                    mesh,
                    internal_edges,
                },
            ) => {
                let mut pieces = Vec::new();
                decompose(a.shape, a.position, a.orientation, &mut pieces);
                Self::collide_mesh(&pieces, b, mesh, *internal_edges, accept, false, out);
            }
            _ => {
                let mut pieces_a = Vec::new();
                let mut pieces_b = Vec::new();
                decompose(a.shape, a.position, a.orientation, &mut pieces_a);
                decompose(b.shape, b.position, b.orientation, &mut pieces_b);

                for pa in &pieces_a {
                    for pb in &pieces_b {
                        if let Some((position, normal, distance)) = Self::collide_convex(pa, pb) {
                            out.add_point(position, normal, distance, -1);
                        }
                    }
                }
            }
        }
    }

    fn ray_cast(
        &self,
        target: &ShapeInstance,
        start: Vec3,
        end: Vec3,
        accept: MaterialFilter,
    ) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        let mut consider = |fract: f32, normal: Vec3, material: i32| {
            if best.map_or(true, |b| fract < b.fract) {
                best = Some(RayHit {
                    fract,
                    position: start.lerp(end, fract),
                    normal,
                    material,
                });
            }
        };

        if let CollisionShape::Mesh { mesh, .. } = target.shape {
            let inv = target.orientation.conjugate();
            let local_start = inv * (start - target.position);
            let local_end = inv * (end - target.position);
            let mut ray_bounds = Aabb::from_points(&[local_start, local_end]);
            ray_bounds = ray_bounds.expanded(Vec3::splat(1e-3));

            for index in 0..mesh.triangle_count() {
                let tri = mesh.triangle(index);
                if !Aabb::from_points(&tri).intersects(&ray_bounds) {
                    continue;
                }
                let material = mesh.material(index);
                if !accept(material) {
                    continue;
                }
                if let Some((t, n)) = ray_triangle(local_start, local_end - local_start, tri) {
                    consider(t, target.orientation * n, material);
                }
            }
        } else {
            let mut pieces = Vec::new();
            decompose(target.shape, target.position, target.orientation, &mut pieces);
            for piece in &pieces {
                if let Some((t, n)) = Self::ray_placed(piece, start, end) {
                    consider(t, n, -1);
                }
            }
        }

        best
    }

    fn convex_cast(
        &self,
        cast: &CollisionShape,
        rotation: Quat,
        start: Vec3,
        end: Vec3,
        target: &ShapeInstance,
        accept: MaterialFilter,
    ) -> Option<RayHit> {
        let displacement = end - start;
        let mut moving = Vec::new();
        decompose(cast, start, rotation, &mut moving);
        if moving.is_empty() {
            return None;
        }

        let mut targets: Vec<(Placed, i32)> = Vec::new();
        if let CollisionShape::Mesh { mesh, .. } = target.shape {
            let inv = target.orientation.conjugate();
            let mut swept = Aabb::empty();
            for piece in &moving {
                let bounds = Self::placed_aabb(piece);
                swept.merge(&bounds);
                swept.merge(&bounds.translated(displacement));
            }
            let mut local_swept = Aabb::empty();
            for corner in swept.corners() {
                local_swept.extend(inv * (corner - target.position));
            }

            for index in 0..mesh.triangle_count() {
                let tri = mesh.triangle(index);
                let material = mesh.material(index);
                if !Aabb::from_points(&tri).intersects(&local_swept) || !accept(material) {
                    continue;
                }
                let world = tri.map(|v| target.position + target.orientation * v);
                targets.push((
                    Placed {
                        primitive: Primitive::Triangle(world),
                        position: Vec3::ZERO,
                        orientation: Quat::IDENTITY,
                    },
                    material,
                ));
            }
        } else {
            let mut pieces = Vec::new();
            decompose(target.shape, target.position, target.orientation, &mut pieces);
            targets.extend(pieces.into_iter().map(|p| (p, -1)));
        }

        let mut best: Option<RayHit> = None;
        for piece in &moving {
            for (target_piece, material) in &targets {
                let Some((fract, position, normal)) = Self::sweep_placed(piece, displacement, target_piece) else {
                    continue;
                };
                if best.map_or(true, |b| fract < b.fract) {
                    best = Some(RayHit {
                        fract,
                        position,
                        normal,
                        material: *material,
                    });
                }
            }
        }
        best
    }
}

fn ray_sphere(start: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<(f32, Vec3)> {
    let oc = start - center;
    let a = dir.length_squared();
    if a < 1e-12 {
        return None;
    }
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    if c < 0.0 {
        return None;
    }
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let normal = (start + dir * t - center).normalize_or_zero();
    Some((t, normal))
}

fn ray_box_local(start: Vec3, dir: Vec3, half_extents: Vec3) -> Option<(f32, Vec3)> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;
    let mut normal = Vec3::ZERO;

    for i in 0..3 {
        if dir[i].abs() < 1e-9 {
            if start[i] < -half_extents[i] || start[i] > half_extents[i] {
                return None;
            }
            continue;
        }

        let inv = 1.0 / dir[i];
        let mut t1 = (-half_extents[i] - start[i]) * inv;
        let mut t2 = (half_extents[i] - start[i]) * inv;
        let mut axis_normal = Vec3::ZERO;
        axis_normal[i] = -1.0;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
            axis_normal = -axis_normal;
        }

        if t1 > t_min {
            t_min = t1;
            normal = axis_normal;
        }
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    (0.0..=1.0).contains(&t_min).then_some((t_min, normal))
}

fn ray_cylinder_local(start: Vec3, dir: Vec3, radius: f32, half_height: f32) -> Option<(f32, Vec3)> {
    let inside_radial = start.x * start.x + start.z * start.z <= radius * radius;
    if inside_radial && start.y.abs() <= half_height {
        return None;
    }

    let mut best: Option<(f32, Vec3)> = None;
    let mut keep = |t: f32, n: Vec3| {
        if (0.0..=1.0).contains(&t) && best.map_or(true, |(b, _)| t < b) {
            best = Some((t, n));
        }
    };

    let a = dir.x * dir.x + dir.z * dir.z;
    if a > 1e-12 {
        let b = start.x * dir.x + start.z * dir.z;
        let c = start.x * start.x + start.z * start.z - radius * radius;
        let disc = b * b - a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / a;
            let p = start + dir * t;
            if p.y.abs() <= half_height {
                keep(t, Vec3::new(p.x, 0.0, p.z).normalize_or_zero());
            }
        }
    }

    if dir.y.abs() > 1e-12 {
        let cap = if dir.y > 0.0 { -half_height } else { half_height };
        let t = (cap - start.y) / dir.y;
        let p = start + dir * t;
        if p.x * p.x + p.z * p.z <= radius * radius {
            keep(t, Vec3::new(0.0, cap.signum(), 0.0));
        }
    }

    best
}

/// Möller-Trumbore; triangles seen from behind are ignored.
fn ray_triangle(start: Vec3, dir: Vec3, [a, b, c]: [Vec3; 3]) -> Option<(f32, Vec3)> {
    let e1 = b - a;
    let e2 = c - a;
    let normal = e1.cross(e2).normalize_or_zero();
    if normal.dot(dir) >= 0.0 {
        return None;
    }

    let h = dir.cross(e2);
    let det = e1.dot(h);
    if det.abs() < 1e-12 {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = start - a;
    let u = s.dot(h) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(q) * inv_det;
    (0.0..=1.0).contains(&t).then_some((t, normal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn accept_all(_: i32) -> bool {
        true
    }

    fn sphere(radius: f32) -> CollisionShape {
        CollisionShape::Sphere { radius }
    }

    fn cube(half: f32) -> CollisionShape {
        CollisionShape::Box {
            center: Vec3::ZERO,
            half_extents: Vec3::splat(half),
        }
    }

    fn collide(a: &ShapeInstance, b: &ShapeInstance) -> ManifoldResult {
        let mut out = ManifoldResult::new();
        GjkNarrowPhase.collide(a, b, &accept_all, &mut out);
        out
    }

    #[test]
    fn overlapping_spheres_report_depth_and_normal_toward_a() {
        let (sa, sb) = (sphere(1.0), sphere(1.0));
        let a = ShapeInstance::new(&sa, Vec3::ZERO, Quat::IDENTITY);
        let b = ShapeInstance::new(&sb, Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY);

        let out = collide(&a, &b);
        let point = out.points()[0];
        assert_abs_diff_eq!(point.distance, -0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(point.normal.x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(point.position.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn separated_shapes_produce_nothing() {
        let (sa, sb) = (cube(1.0), cube(1.0));
        let a = ShapeInstance::new(&sa, Vec3::ZERO, Quat::IDENTITY);
        let b = ShapeInstance::new(&sb, Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        assert!(collide(&a, &b).is_empty());
    }

    #[test]
    fn rotated_boxes_overlap_through_gjk() {
        let (sa, sb) = (cube(1.0), cube(1.0));
        let a = ShapeInstance::new(&sa, Vec3::ZERO, Quat::from_rotation_z(45f32.to_radians()));
        let b = ShapeInstance::new(&sb, Vec3::new(2.1, 0.0, 0.0), Quat::IDENTITY);

        let out = collide(&a, &b);
        assert!(!out.is_empty());
        let point = out.points()[0];
        assert!(point.distance < 0.0);
        assert!(point.normal.x < -0.9, "normal was {:?}", point.normal);
    }

    #[test]
    fn sphere_resting_on_box_gets_up_normal() {
        let (sa, sb) = (sphere(0.5), cube(1.0));
        let a = ShapeInstance::new(&sa, Vec3::new(0.0, 1.4, 0.0), Quat::IDENTITY);
        let b = ShapeInstance::new(&sb, Vec3::ZERO, Quat::IDENTITY);

        let point = collide(&a, &b).points()[0];
        assert_abs_diff_eq!(point.normal.y, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(point.distance, -0.1, epsilon = 1e-5);
    }

    #[test]
    fn rays_hit_primitives_at_the_right_fraction() {
        let shape = cube(1.0);
        let target = ShapeInstance::new(&shape, Vec3::ZERO, Quat::IDENTITY);
        let hit = GjkNarrowPhase
            .ray_cast(&target, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), &accept_all)
            .expect("box hit");
        assert_abs_diff_eq!(hit.fract, 0.4, epsilon = 1e-5);
        assert_abs_diff_eq!(hit.normal.x, -1.0, epsilon = 1e-5);

        let ball = sphere(1.0);
        let target = ShapeInstance::new(&ball, Vec3::new(0.0, 0.0, 5.0), Quat::IDENTITY);
        let hit = GjkNarrowPhase
            .ray_cast(&target, Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0), &accept_all)
            .expect("sphere hit");
        assert_abs_diff_eq!(hit.fract, 0.4, epsilon = 1e-5);
    }

    #[test]
    fn sweep_stops_in_front_of_target() {
        let (cast, wall) = (sphere(0.5), cube(1.0));
        let target = ShapeInstance::new(&wall, Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY);
        let hit = GjkNarrowPhase
            .convex_cast(&cast, Quat::IDENTITY, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), &target, &accept_all)
            .expect("sweep hit");
        assert_abs_diff_eq!(hit.fract, 0.35, epsilon = 1e-3);
        assert!(hit.normal.x < -0.9);
    }
}
