use std::collections::HashMap;

use glam::{Vec2, Vec3, Vec3Swizzles};
use parking_lot::Mutex;

use crate::{
    config::PHYSICS_MAX_CLOSEST_TEST_TRIES,
    core::types::{Aabb, ObjectHandle},
    utils::debug::{DebugColor, DebugDraw},
};

/// Inclusive rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl CellRange {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y + 1
    }

    /// Row-major iteration over every cell of the range.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

/// One column of the XZ grid.
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
    /// Static objects overlapping this cell; one object may sit in many cells.
    pub grid_objects: Vec<ObjectHandle>,
    /// Dynamic objects whose position lies in this cell.
    pub dynamic_objects: Vec<ObjectHandle>,
    /// Largest absolute Y reached by a registered static.
    pub cell_bound_used: f32,
}

impl GridCell {
    fn is_empty(&self) -> bool {
        self.grid_objects.is_empty() && self.dynamic_objects.is_empty()
    }
}

/// Sparse uniform grid over the XZ plane.
pub struct BroadphaseGrid {
    cell_size: f32,
    inv_cell_size: f32,
    wide: i32,
    tall: i32,
    origin: Vec2,
    cells: Mutex<HashMap<i32, GridCell>>,
}

impl BroadphaseGrid {
    /// Grid covering `[-world_size, world_size]` on X and Z.
    pub fn new(cell_size: f32, world_size: f32) -> Self {
        let cell_size = cell_size.max(f32::EPSILON);
        let extent = world_size * 2.0;
        let wide = (extent / cell_size).ceil() as i32;
        let tall = wide;
        let half_neg = cell_size * -0.5;

        log::debug!("BroadphaseGrid::new - {wide}x{tall} cells of {cell_size}");

        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            wide,
            tall,
            origin: Vec2::new(wide as f32 * half_neg, tall as f32 * half_neg),
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn dimensions(&self) -> (i32, i32) {
        (self.wide, self.tall)
    }

    fn cell_index(&self, x: i32, y: i32) -> Option<i32> {
        self.in_bounds(x, y).then_some(y * self.wide + x)
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.wide && y >= 0 && y < self.tall
    }

    /// Fractional cell coordinates of `pos`, even outside the grid.
    pub fn get_point_at_unchecked(&self, pos: Vec3) -> Vec2 {
        (pos.xz() - self.origin) * self.inv_cell_size
    }

    pub fn get_point_at(&self, pos: Vec3) -> Option<Vec2> {
        let p = self.get_point_at_unchecked(pos);
        let inside = p.x >= 0.0 && p.x < self.wide as f32 && p.y >= 0.0 && p.y < self.tall as f32;
        inside.then_some(p)
    }

    pub fn cell_at_pos(&self, pos: Vec3) -> Option<(i32, i32)> {
        let p = self.get_point_at(pos)?;
        Some((p.x.floor() as i32, p.y.floor() as i32))
    }

    pub fn has_cell(&self, x: i32, y: i32) -> bool {
        self.cell_index(x, y)
            .is_some_and(|index| self.cells.lock().contains_key(&index))
    }

    /// Runs `f` on the cell under the grid lock.
    pub fn get_cell_at<R>(&self, x: i32, y: i32, f: impl FnOnce(&GridCell) -> R) -> Option<R> {
        let index = self.cell_index(x, y)?;
        let cells = self.cells.lock();
        cells.get(&index).map(f)
    }

    /// Ensures the cell exists; returns `false` outside the grid.
    pub fn get_alloc_cell_at(&self, x: i32, y: i32) -> bool {
        let Some(index) = self.cell_index(x, y) else {
            return false;
        };
        self.cells.lock().entry(index).or_insert_with(|| GridCell {
            x,
            y,
            ..GridCell::default()
        });
        true
    }

    /// Drops the cell and hands back the dynamic objects that lost their cell.
    pub fn free_cell_at(&self, x: i32, y: i32) -> Vec<ObjectHandle> {
        let Some(index) = self.cell_index(x, y) else {
            return Vec::new();
        };
        match self.cells.lock().remove(&index) {
            Some(cell) => {
                if !cell.grid_objects.is_empty() {
                    log::warn!(
                        "BroadphaseGrid::free_cell_at - cell [{x} {y}] deallocated, but in use ({})",
                        cell.grid_objects.len()
                    );
                }
                cell.dynamic_objects
            }
            None => Vec::new(),
        }
    }

    pub fn allocated_cells(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn cell_bounds_xz(&self, x: i32, y: i32) -> (Vec2, Vec2) {
        let min = Vec2::new(x as f32, y as f32) * self.cell_size + self.origin;
        let max = Vec2::new((x + 1) as f32, (y + 1) as f32) * self.cell_size + self.origin;
        (min, max)
    }

    /// Full bounds of an allocated cell, `None` when not allocated.
    pub fn cell_bounds(&self, x: i32, y: i32) -> Option<Aabb> {
        let height = self.get_cell_at(x, y, |cell| cell.cell_bound_used)?;
        let (min, max) = self.cell_bounds_xz(x, y);
        Some(Aabb::new(
            Vec3::new(min.x, -height, min.y),
            Vec3::new(max.x, height, max.y),
        ))
    }

    /// Cells covered by `aabb`, widened by one where the box comes within
    /// `tolerance` (a fraction of a cell) of a cell border. Clamped to the grid.
    pub fn find_box_range(&self, aabb: &Aabb, tolerance: f32) -> CellRange {
        let p1 = (aabb.min_xz() - self.origin) * self.inv_cell_size;
        let p2 = (aabb.max_xz() - self.origin) * self.inv_cell_size;

        let (mut min_x, mut min_y) = (p1.x.floor(), p1.y.floor());
        let (mut max_x, mut max_y) = (p2.x.floor(), p2.y.floor());

        if tolerance > 0.0 {
            let rec = 1.0 - tolerance;
            if p1.x - p1.x.floor() < tolerance {
                min_x -= 1.0;
            }
            if p1.y - p1.y.floor() < tolerance {
                min_y -= 1.0;
            }
            if p2.x - p2.x.floor() > rec {
                max_x += 1.0;
            }
            if p2.y - p2.y.floor() > rec {
                max_y += 1.0;
            }
        }

        let clamp_x = |v: f32| (v as i32).clamp(0, self.wide - 1);
        let clamp_y = |v: f32| (v as i32).clamp(0, self.tall - 1);
        CellRange {
            min_x: clamp_x(min_x),
            min_y: clamp_y(min_y),
            max_x: clamp_x(max_x),
            max_y: clamp_y(max_y),
        }
    }

    /// Registers a static object in every cell its bounds touch.
    pub fn add_static_object_to_grid(
        &self,
        handle: ObjectHandle,
        aabb: &Aabb,
        position: Vec3,
    ) -> Option<CellRange> {
        if self.get_point_at(position).is_none() {
            log::error!("BroadphaseGrid::add_static_object_to_grid - object at {position} is outside of the grid");
            return None;
        }

        let range = self.find_box_range(aabb, 0.0);
        let height = aabb.max.y.abs().max(aabb.min.y.abs());

        let mut cells = self.cells.lock();
        for (x, y) in range.cells() {
            let index = y * self.wide + x;
            let cell = cells.entry(index).or_insert_with(|| GridCell {
                x,
                y,
                ..GridCell::default()
            });
            if !cell.grid_objects.contains(&handle) {
                cell.grid_objects.push(handle);
            }
            cell.cell_bound_used = cell.cell_bound_used.max(height);
        }

        Some(range)
    }

    /// Unregisters a static object; cells left with no objects at all are freed.
    pub fn remove_static_object_from_grid(&self, handle: ObjectHandle, range: CellRange) {
        let mut cells = self.cells.lock();
        for (x, y) in range.cells() {
            let index = y * self.wide + x;
            let Some(cell) = cells.get_mut(&index) else {
                continue;
            };

            match cell.grid_objects.iter().position(|h| *h == handle) {
                Some(i) => {
                    cell.grid_objects.swap_remove(i);
                }
                None => log::error!("BroadphaseGrid::remove_static_object_from_grid - not found in [{x} {y}]"),
            }

            if cell.is_empty() {
                cells.remove(&index);
            }
        }
    }

    /// Moves a dynamic object to the cell at `position`, returning its new cell.
    pub fn move_dynamic_object(
        &self,
        handle: ObjectHandle,
        old: Option<(i32, i32)>,
        position: Vec3,
    ) -> Option<(i32, i32)> {
        let new = self.cell_at_pos(position);
        if new == old {
            return old;
        }

        let mut cells = self.cells.lock();
        if let Some((x, y)) = old {
            Self::unlink_dynamic(&mut cells, y * self.wide + x, handle);
        }

        if let Some((x, y)) = new {
            let cell = cells.entry(y * self.wide + x).or_insert_with(|| GridCell {
                x,
                y,
                ..GridCell::default()
            });
            cell.dynamic_objects.push(handle);
        }

        new
    }

    pub fn remove_dynamic_object(&self, handle: ObjectHandle, cell: (i32, i32)) {
        let Some(index) = self.cell_index(cell.0, cell.1) else {
            return;
        };
        Self::unlink_dynamic(&mut self.cells.lock(), index, handle);
    }

    fn unlink_dynamic(cells: &mut HashMap<i32, GridCell>, index: i32, handle: ObjectHandle) {
        let Some(cell) = cells.get_mut(&index) else {
            return;
        };
        if let Some(i) = cell.dynamic_objects.iter().position(|h| *h == handle) {
            cell.dynamic_objects.remove(i);
        }
        if cell.is_empty() {
            cells.remove(&index);
        }
    }

    /// Copies the statics (deduplicated) and dynamics registered in `range` out of the lock.
    pub fn collect_range(&self, range: CellRange) -> (Vec<ObjectHandle>, Vec<ObjectHandle>) {
        let mut statics = Vec::new();
        let mut dynamics = Vec::new();

        let cells = self.cells.lock();
        for (x, y) in range.cells() {
            let Some(cell) = cells.get(&(y * self.wide + x)) else {
                continue;
            };
            for handle in &cell.grid_objects {
                if !statics.contains(handle) {
                    statics.push(*handle);
                }
            }
            dynamics.extend_from_slice(&cell.dynamic_objects);
        }

        (statics, dynamics)
    }

    /// Visits each allocated cell of `range` under the lock.
    pub fn for_each_in_range(&self, range: CellRange, mut f: impl FnMut(&GridCell)) {
        let cells = self.cells.lock();
        for (x, y) in range.cells() {
            if let Some(cell) = cells.get(&(y * self.wide + x)) {
                f(cell);
            }
        }
    }

    /// Copy of a cell's statics and dynamics, `None` when not allocated.
    pub fn cell_contents(&self, x: i32, y: i32) -> Option<(Vec<ObjectHandle>, Vec<ObjectHandle>)> {
        self.get_cell_at(x, y, |cell| (cell.grid_objects.clone(), cell.dynamic_objects.clone()))
    }

    /// Walks the cells crossed by a line between two fractional cell coordinates.
    ///
    /// `visit` returns `false` when it found the closest hit in that cell; the
    /// walk ends after that happened [`PHYSICS_MAX_CLOSEST_TEST_TRIES`] times.
    pub fn traverse_line(start: Vec2, end: Vec2, mut visit: impl FnMut(i32, i32) -> bool) {
        let start_cell = (start.x.floor() as i32, start.y.floor() as i32);
        let end_cell = (end.x.floor() as i32, end.y.floor() as i32);
        if start_cell == end_cell {
            visit(start_cell.0, start_cell.1);
            return;
        }

        let dif = end - start;
        let dist = dif.x.abs() + dif.y.abs();
        let step = dif / dist;

        let mut closest_tries = 0;
        let steps = dist.ceil() as i32;
        for i in 0..=steps {
            if closest_tries >= PHYSICS_MAX_CLOSEST_TEST_TRIES {
                break;
            }
            let p = start + step * i as f32;
            if !visit(p.x.floor() as i32, p.y.floor() as i32) {
                closest_tries += 1;
            }
        }
    }

    pub fn debug_render(&self, draw: &mut dyn DebugDraw) {
        let cells = self.cells.lock();
        for cell in cells.values() {
            let (min, max) = self.cell_bounds_xz(cell.x, cell.y);
            let bounds = Aabb::new(
                Vec3::new(min.x, -cell.cell_bound_used, min.y),
                Vec3::new(max.x, cell.cell_bound_used, max.y),
            );
            draw.aabb(&bounds, DebugColor::GRID);
        }
    }

    /// Drops every cell.
    pub fn clear(&self) {
        self.cells.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BodyId;
    use crate::utils::EntityId;

    fn body(index: u32) -> ObjectHandle {
        ObjectHandle::Body(BodyId(EntityId::new(index, 0)))
    }

    #[test]
    fn cell_coordinates_round_trip() {
        let grid = BroadphaseGrid::new(24.0, 32767.0);
        let (x, y) = grid.cell_at_pos(Vec3::new(10.0, 5.0, -30.0)).expect("inside");
        let (min, max) = grid.cell_bounds_xz(x, y);
        assert!(min.x <= 10.0 && 10.0 < max.x);
        assert!(min.y <= -30.0 && -30.0 < max.y);
        assert!(grid.cell_at_pos(Vec3::new(40000.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn box_range_grows_near_borders() {
        let grid = BroadphaseGrid::new(10.0, 100.0);
        let (x, y) = grid.cell_at_pos(Vec3::new(0.5, 0.0, 5.0)).expect("inside");
        let aabb = Aabb::new(Vec3::new(0.5, 0.0, 4.0), Vec3::new(1.0, 0.0, 6.0));

        let tight = grid.find_box_range(&aabb, 0.0);
        assert_eq!((tight.min_x, tight.min_y, tight.max_x, tight.max_y), (x, y, x, y));

        let loose = grid.find_box_range(&aabb, 0.1);
        assert_eq!(loose.min_x, x - 1);
        assert_eq!(loose.max_x, x);
    }

    #[test]
    fn dynamic_move_keeps_single_membership() {
        let grid = BroadphaseGrid::new(10.0, 100.0);
        let handle = body(1);
        let first = grid.move_dynamic_object(handle, None, Vec3::new(1.0, 0.0, 1.0));
        let second = grid.move_dynamic_object(handle, first, Vec3::new(25.0, 0.0, 1.0));
        assert_ne!(first, second);

        let (fx, fy) = first.expect("first cell");
        assert!(!grid.has_cell(fx, fy));
        let (sx, sy) = second.expect("second cell");
        let (_, dynamics) = grid.cell_contents(sx, sy).expect("allocated");
        assert_eq!(dynamics, vec![handle]);
    }

    #[test]
    fn straight_line_visits_every_crossed_cell() {
        let mut visited = Vec::new();
        BroadphaseGrid::traverse_line(Vec2::new(0.5, 0.5), Vec2::new(3.5, 0.5), |x, y| {
            visited.push((x, y));
            true
        });
        assert_eq!(visited, vec![(0, 0), (1, 0), (2, 0), (3, 0)]);

        let mut count = 0;
        BroadphaseGrid::traverse_line(Vec2::new(0.5, 0.5), Vec2::new(9.5, 0.5), |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, PHYSICS_MAX_CLOSEST_TEST_TRIES as usize);
    }
}
