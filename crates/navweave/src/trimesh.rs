use glam::{Affine3A, UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A triangle soup used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices of the mesh in world space.
    pub vertices: Vec<Vec3A>,

    /// The vertex indices of each triangle.
    pub indices: Vec<UVec3>,

    /// The area types of the triangles. Each entry corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: TriMesh) {
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Appends a single triangle.
    pub fn push_triangle(&mut self, triangle: [Vec3A; 3], area: AreaType) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(triangle);
        self.indices.push(UVec3::new(base, base + 1, base + 2));
        self.area_types.push(area);
    }

    /// Number of triangles.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Returns `true` if the mesh has no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Applies `transform` to every vertex.
    pub fn transform(&mut self, transform: &Affine3A) {
        for vertex in &mut self.vertices {
            *vertex = transform.transform_point3a(*vertex);
        }
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// A triangle becomes walkable if the angle between its normal and the up axis is below
    /// the threshold, and non-walkable otherwise.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);
            self.area_types[i] = if normal.y > threshold_cos {
                AreaType::DEFAULT_WALKABLE
            } else {
                AreaType::NOT_WALKABLE
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(rise: f32) -> TriMesh {
        let mut trimesh = TriMesh::default();
        trimesh.push_triangle(
            [
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, rise, 0.0),
            ],
            AreaType::NOT_WALKABLE,
        );
        trimesh
    }

    #[test]
    fn flat_triangle_is_walkable() {
        let mut trimesh = ramp(0.0);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(trimesh.area_types, vec![AreaType::DEFAULT_WALKABLE]);
    }

    #[test]
    fn steep_triangle_is_not_walkable() {
        let mut trimesh = ramp(3.0);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(trimesh.area_types, vec![AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn extend_offsets_indices() {
        let mut a = ramp(0.0);
        a.extend(ramp(0.0));
        assert_eq!(a.triangle_count(), 2);
        assert_eq!(a.indices[1], UVec3::new(3, 4, 5));
        assert_eq!(a.compute_aabb().unwrap().max, Vec3A::new(1.0, 0.0, 1.0));
    }
}
