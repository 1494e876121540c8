use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::types::Aabb;

const NO_NEIGHBOUR: u32 = u32::MAX;

/// Indexed triangle mesh with per-triangle surface material and edge adjacency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    /// Surface parameter id per triangle, `-1` when unassigned.
    pub materials: Vec<i32>,
    pub bounds: Aabb,
    /// Triangle across each edge `(v0,v1)`, `(v1,v2)`, `(v2,v0)`.
    neighbours: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn builder(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> MeshBuilder {
        MeshBuilder::new(vertices, indices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let [a, b, c] = self.indices[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    pub fn triangle_normal(&self, index: usize) -> Vec3 {
        let [a, b, c] = self.triangle(index);
        (b - a).cross(c - a).normalize_or_zero()
    }

    pub fn material(&self, index: usize) -> i32 {
        self.materials.get(index).copied().unwrap_or(-1)
    }

    pub fn neighbour(&self, index: usize, edge: usize) -> Option<usize> {
        let n = self.neighbours.get(index)?[edge];
        (n != NO_NEIGHBOUR).then_some(n as usize)
    }

    /// Every distinct material id used by the mesh.
    pub fn material_ids(&self) -> Vec<i32> {
        let mut ids = self.materials.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Corrects a contact normal produced against triangle `index`.
    ///
    /// The normal always ends up on the front side of the triangle. With
    /// `internal_edges` set, a normal produced at an edge shared with another
    /// triangle is snapped to the face normal so bodies slide across seams.
    pub fn adjust_contact_normal(
        &self,
        index: usize,
        local_point: Vec3,
        normal: Vec3,
        internal_edges: bool,
    ) -> Vec3 {
        let face = self.triangle_normal(index);
        if face == Vec3::ZERO {
            return normal;
        }

        if normal.dot(face) <= 0.0 {
            return face;
        }

        if !internal_edges {
            return normal;
        }

        let [a, b, c] = self.triangle(index);
        let bary = barycentric(local_point, a, b, c);
        const EDGE_EPSILON: f32 = 1e-3;

        // Barycentric weight of vertex k near zero means the point lies on the opposite edge.
        let edges = [(bary.z, 0usize), (bary.x, 1), (bary.y, 2)];
        for (weight, edge) in edges {
            if weight < EDGE_EPSILON && self.neighbour(index, edge).is_some() {
                return face;
            }
        }

        normal
    }
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f32::EPSILON {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vec3::new(1.0 - v - w, v, w)
}

/// Cooks triangle meshes from raw vertex/index buffers.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    materials: Vec<i32>,
}

impl MeshBuilder {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        let materials = vec![-1; indices.len()];
        Self {
            vertices,
            indices,
            materials,
        }
    }

    /// Assigns one surface parameter id to every triangle.
    pub fn material(mut self, material: i32) -> Self {
        self.materials.iter_mut().for_each(|m| *m = material);
        self
    }

    /// Assigns per-triangle surface parameter ids; missing entries stay unassigned.
    pub fn materials(mut self, materials: &[i32]) -> Self {
        for (slot, material) in self.materials.iter_mut().zip(materials) {
            *slot = *material;
        }
        self
    }

    /// Deduplicates vertices using a quantized grid so shared edges are detected.
    pub fn weld_vertices(mut self, epsilon: f32) -> Self {
        if epsilon <= 0.0 || self.vertices.is_empty() {
            return self;
        }

        let inv = 1.0 / epsilon;
        let mut map: HashMap<(i32, i32, i32), u32> = HashMap::new();
        let mut new_vertices: Vec<Vec3> = Vec::new();
        let mut remap: Vec<u32> = Vec::with_capacity(self.vertices.len());

        for v in &self.vertices {
            let key = (
                (v.x * inv).round() as i32,
                (v.y * inv).round() as i32,
                (v.z * inv).round() as i32,
            );
            let index = *map.entry(key).or_insert_with(|| {
                let idx = new_vertices.len() as u32;
                new_vertices.push(*v);
                idx
            });
            remap.push(index);
        }

        for tri in &mut self.indices {
            for corner in tri.iter_mut() {
                *corner = remap[*corner as usize];
            }
        }

        self.vertices = new_vertices;
        self
    }

    pub fn build(self) -> TriangleMesh {
        let vertex_count = self.vertices.len() as u32;
        let (indices, materials): (Vec<[u32; 3]>, Vec<i32>) = self
            .indices
            .into_iter()
            .zip(self.materials)
            .filter(|(tri, _)| tri.iter().all(|&i| i < vertex_count))
            .unzip();

        let mut edge_owner: HashMap<(u32, u32), (usize, usize)> = HashMap::new();
        let mut neighbours = vec![[NO_NEIGHBOUR; 3]; indices.len()];

        for (tri_index, tri) in indices.iter().enumerate() {
            for edge in 0..3 {
                let (a, b) = (tri[edge], tri[(edge + 1) % 3]);
                let key = (a.min(b), a.max(b));
                match edge_owner.get(&key) {
                    Some(&(other, other_edge)) => {
                        neighbours[tri_index][edge] = other as u32;
                        neighbours[other][other_edge] = tri_index as u32;
                    }
                    None => {
                        edge_owner.insert(key, (tri_index, edge));
                    }
                }
            }
        }

        TriangleMesh {
            bounds: Aabb::from_points(&self.vertices),
            vertices: self.vertices,
            indices,
            materials,
            neighbours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriangleMesh {
        let vertices = vec![
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 1.0),
        ];
        TriangleMesh::builder(vertices, vec![[0, 2, 1], [0, 3, 2]])
            .material(3)
            .build()
    }

    #[test]
    fn shared_edge_links_both_triangles() {
        let mesh = quad();
        assert_eq!(mesh.neighbour(0, 0), Some(1));
        assert_eq!(mesh.neighbour(1, 2), Some(0));
        assert_eq!(mesh.neighbour(0, 1), None);
        assert_eq!(mesh.material_ids(), vec![3]);
    }

    #[test]
    fn internal_edge_contact_is_snapped_to_face_normal() {
        let mesh = quad();
        assert!(mesh.triangle_normal(0).y > 0.99);

        let tilted = Vec3::new(0.7, 0.7, 0.0).normalize();
        let on_diagonal = Vec3::new(0.0, 0.0, 0.0);
        let adjusted = mesh.adjust_contact_normal(0, on_diagonal, tilted, true);
        assert!(adjusted.y > 0.99);

        let kept = mesh.adjust_contact_normal(0, on_diagonal, tilted, false);
        assert_eq!(kept, tilted);

        let backside = mesh.adjust_contact_normal(0, on_diagonal, -Vec3::Y, false);
        assert!(backside.y > 0.99);
    }
}
