use std::sync::atomic::Ordering;

use glam::{Quat, Vec3, Vec3Swizzles};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::PhysicsWorld;
use crate::{
    collision::{
        broadphase::BroadphaseGrid,
        narrowphase::{RayHit, ShapeInstance},
        queries::{check_allow_contact_test, CollisionFilter, CollisionInfo, FilterFlags},
        shapes::ShapeUtil,
    },
    core::{
        collider::{CollisionObject, CollisionShape},
        types::{Aabb, ObjectFlags, ObjectHandle},
    },
    utils::math::{ray_rect_intersection, rotate_aabb},
};

/// Starting fraction of a line query; anything below 1 is a hit.
const LINE_MAX_FRACT: f32 = 10.0;
/// Starting fraction of a convex sweep.
const SWEEP_MAX_FRACT: f32 = 32768.0;

/// Segment shared by every cell visited during one query.
struct Segment<'a> {
    start: Vec3,
    end: Vec3,
    ray_box: Aabb,
    ray_mask: u32,
    filter: Option<&'a CollisionFilter>,
}

impl PhysicsWorld {
    /// Closest hit of the segment `start..end` against statics and bodies
    /// whose contents intersect `ray_mask`.
    pub fn test_line_collision(
        &self,
        start: Vec3,
        end: Vec3,
        ray_mask: u32,
        filter: Option<&CollisionFilter>,
    ) -> Option<CollisionInfo> {
        let segment = Segment {
            start,
            end,
            ray_box: Aabb::from_points(&[start, end]),
            ray_mask,
            filter,
        };

        let mut info = CollisionInfo::miss(end, LINE_MAX_FRACT);
        self.traverse_segment(&segment, &mut info, |object, _| {
            let surfaces = &self.collision.surfaces;
            let accept = |material: i32| surfaces.get(material).map_or(true, |p| p.allows_contents(ray_mask));
            let target = ShapeInstance::new(object.shape()?, object.position(), object.orientation());

            self.collision.num_ray_queries.fetch_add(1, Ordering::Relaxed);
            self.collision.narrow_phase.ray_cast(&target, start, end, &accept)
        });

        info.fract = info.fract.min(1.0);
        (info.fract < 1.0).then_some(info)
    }

    /// Sweeps a convex `shape` held at `rotation` from `start` to `end`.
    pub fn test_convex_sweep_collision(
        &self,
        shape: &CollisionShape,
        rotation: Quat,
        start: Vec3,
        end: Vec3,
        ray_mask: u32,
        filter: Option<&CollisionFilter>,
    ) -> Option<CollisionInfo> {
        if !shape.is_convex() {
            log::error!("test_convex_sweep_collision: shape is not convex");
            return None;
        }

        let size = rotate_aabb(&ShapeUtil::local_aabb(shape), rotation).size();
        let mut ray_box = Aabb::from_points(&[start, end]);
        ray_box.extend(ray_box.min - size);
        ray_box.extend(ray_box.max + size);

        let segment = Segment {
            start,
            end,
            ray_box,
            ray_mask,
            filter,
        };

        let mut info = CollisionInfo::miss(end, SWEEP_MAX_FRACT);
        self.traverse_segment(&segment, &mut info, |object, _| {
            let surfaces = &self.collision.surfaces;
            let accept = |material: i32| surfaces.get(material).map_or(true, |p| p.allows_contents(ray_mask));
            let target = ShapeInstance::new(object.shape()?, object.position(), object.orientation());
            self.collision
                .narrow_phase
                .convex_cast(shape, rotation, start, end, &target, &accept)
        });

        info.fract = info.fract.clamp(0.0, 1.0);
        (info.fract < 1.0).then_some(info)
    }

    /// Runs many line queries at once; the results keep the order of `rays`.
    pub fn test_line_collisions_batch(
        &self,
        rays: &[(Vec3, Vec3)],
        ray_mask: u32,
        filter: Option<&CollisionFilter>,
    ) -> Vec<Option<CollisionInfo>> {
        #[cfg(feature = "parallel")]
        {
            rays.par_iter()
                .map(|&(start, end)| self.test_line_collision(start, end, ray_mask, filter))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            rays.iter()
                .map(|&(start, end)| self.test_line_collision(start, end, ray_mask, filter))
                .collect()
        }
    }

    /// Walks the grid cells under the segment, keeping the closest hit in `info`.
    fn traverse_segment(
        &self,
        segment: &Segment<'_>,
        info: &mut CollisionInfo,
        test: impl Fn(&CollisionObject, ObjectHandle) -> Option<RayHit>,
    ) {
        let Some(grid) = self.collision.grid.as_ref() else {
            return;
        };

        let start_cell = grid.get_point_at_unchecked(segment.start);
        let end_cell = grid.get_point_at_unchecked(segment.end);
        let mut skip = Vec::new();

        BroadphaseGrid::traverse_line(start_cell, end_cell, |x, y| {
            self.test_segment_on_cell(grid, x, y, segment, info, &mut skip, &test)
        });
    }

    /// Returns `false` once the closest hit was found in this cell.
    #[allow(clippy::too_many_arguments)]
    fn test_segment_on_cell(
        &self,
        grid: &BroadphaseGrid,
        x: i32,
        y: i32,
        segment: &Segment<'_>,
        info: &mut CollisionInfo,
        skip: &mut Vec<ObjectHandle>,
        test: &impl Fn(&CollisionObject, ObjectHandle) -> Option<RayHit>,
    ) -> bool {
        let Some((statics, dynamics)) = grid.cell_contents(x, y) else {
            return true;
        };

        let (cell_min, cell_max) = grid.cell_bounds_xz(x, y);
        let direction = (segment.end - segment.start).xz();
        if let Some((tnear, _)) = ray_rect_intersection(cell_min, cell_max, segment.start.xz(), direction) {
            if tnear > info.fract {
                return false;
            }
        }

        let filter_flags = segment
            .filter
            .map_or(FilterFlags::STATIC_OBJECTS | FilterFlags::DYNAMIC_OBJECTS, |f| f.flags);
        let test_statics =
            filter_flags & FilterFlags::STATIC_OBJECTS != 0 && filter_flags & FilterFlags::DISALLOW_STATIC == 0;
        let test_dynamics =
            filter_flags & FilterFlags::DYNAMIC_OBJECTS != 0 && filter_flags & FilterFlags::DISALLOW_DYNAMIC == 0;

        let statics = statics.into_iter().filter(|_| test_statics);
        let dynamics = dynamics.into_iter().filter(|_| test_dynamics);

        let mut hit = false;
        let mut hit_closest = false;
        for handle in statics.chain(dynamics) {
            if skip.contains(&handle) {
                continue;
            }
            let Some(object) = self.collision_object(handle) else {
                continue;
            };
            if !self.accepts_query(handle, object, segment) {
                continue;
            }
            let Some(result) = test(object, handle) else {
                continue;
            };

            hit = true;
            if result.fract < info.fract {
                skip.push(handle);
                *info = CollisionInfo {
                    position: result.position,
                    normal: result.normal,
                    fract: result.fract,
                    material_index: if result.material >= 0 { result.material } else { object.surf_param },
                    hit_object: Some(handle),
                };
                hit_closest = true;
            }
        }

        if hit {
            !hit_closest
        } else {
            true
        }
    }

    /// Cheap per-object rejection run before any narrow-phase work.
    fn accepts_query(&self, handle: ObjectHandle, object: &CollisionObject, segment: &Segment<'_>) -> bool {
        let force_raycast = segment
            .filter
            .is_some_and(|f| f.flags & FilterFlags::FORCE_RAYCAST != 0);
        if object.has_flags(ObjectFlags::NO_RAYCAST) && !force_raycast {
            return false;
        }
        if object.contents & segment.ray_mask == 0 {
            return false;
        }
        if object.shape().is_none() {
            return false;
        }
        if !check_allow_contact_test(segment.filter, handle, object, handle.is_body()) {
            return false;
        }
        object.aabb().intersects(&segment.ray_box)
    }
}
