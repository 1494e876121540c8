//! Backend-agnostic debug drawing interface.
//!
//! Implement [`DebugDraw`] for a renderer and pass it to
//! [`crate::PhysicsWorld::debug_draw_bodies`].

use glam::{Quat, Vec3};

use crate::core::types::Aabb;

/// RGBA color, 0-255 per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl DebugColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const RED: Self = Self::new(255, 50, 50, 255);
    pub const GREEN: Self = Self::new(50, 255, 50, 255);
    pub const YELLOW: Self = Self::new(255, 255, 50, 255);
    pub const CYAN: Self = Self::new(50, 255, 255, 255);
    pub const WHITE: Self = Self::new(255, 255, 255, 255);
    pub const GRID: Self = Self::new(255, 0, 255, 64);
}

pub trait DebugDraw {
    fn line(&mut self, start: Vec3, end: Vec3, color: DebugColor);

    fn aabb(&mut self, bounds: &Aabb, color: DebugColor) {
        self.oriented_box(bounds, Vec3::ZERO, Quat::IDENTITY, color);
    }

    /// Box given in local space, then rotated and translated.
    fn oriented_box(&mut self, local: &Aabb, position: Vec3, orientation: Quat, color: DebugColor) {
        let corners = local.corners().map(|c| position + orientation * c);
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (2, 3), (4, 5), (6, 7),
            (0, 2), (1, 3), (4, 6), (5, 7),
            (0, 4), (1, 5), (2, 6), (3, 7),
        ];
        for (a, b) in EDGES {
            self.line(corners[a], corners[b], color);
        }
    }

    fn text(&mut self, _position: Vec3, _text: &str, _color: DebugColor) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDebugDraw;

impl DebugDraw for NullDebugDraw {
    fn line(&mut self, _start: Vec3, _end: Vec3, _color: DebugColor) {}
}

/// Records every line; handy for tests and offline inspection.
#[derive(Debug, Default, Clone)]
pub struct LineCollector {
    pub lines: Vec<(Vec3, Vec3, DebugColor)>,
    pub texts: Vec<(Vec3, String)>,
}

impl DebugDraw for LineCollector {
    fn line(&mut self, start: Vec3, end: Vec3, color: DebugColor) {
        self.lines.push((start, end, color));
    }

    fn text(&mut self, position: Vec3, text: &str, _color: DebugColor) {
        self.texts.push((position, text.to_owned()));
    }
}
