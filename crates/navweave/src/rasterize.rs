//! Conservative voxelization of triangles into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes every triangle of a [`TriMesh`] into the heightfield.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize. Its area types decide the area of the generated spans.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. `[Limit: >= 0] [Units: vx]`
    ///   Usually the walkable climb.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.area_types.len() != trimesh.indices.len() {
            return Err(RasterizationError::AreaCountMismatch {
                triangles: trimesh.indices.len(),
                areas: trimesh.area_types.len(),
            });
        }
        for (triangle, area) in trimesh.indices.iter().zip(&trimesh.area_types) {
            let mut vertices = [Vec3A::ZERO; 3];
            for (vertex, index) in vertices.iter_mut().zip(triangle.to_array()) {
                *vertex = *trimesh.vertices.get(index as usize).ok_or(
                    RasterizationError::VertexIndexOutOfBounds {
                        index,
                        len: trimesh.vertices.len(),
                    },
                )?;
            }
            self.rasterize_triangle(vertices, *area, flag_merge_threshold)?;
        }
        Ok(())
    }

    pub(crate) fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let tri_min = triangle[0].min(triangle[1]).min(triangle[2]);
        let tri_max = triangle[0].max(triangle[1]).max(triangle[2]);
        if tri_min.cmpgt(self.aabb.max).any() || tri_max.cmplt(self.aabb.min).any() {
            return Ok(());
        }
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let field_height = self.aabb.max.y - self.aabb.min.y;
        let w = self.width as i32;
        let h = self.height as i32;

        // -1 so the polygon is cut cleanly at the start of the field.
        let z0 = (((tri_min.z - self.aabb.min.z) * inverse_cell_size) as i32).clamp(-1, h - 1);
        let z1 = (((tri_max.z - self.aabb.min.z) * inverse_cell_size) as i32).clamp(0, h - 1);

        let mut remaining: Vec<Vec3A> = triangle.to_vec();
        let mut row = Vec::with_capacity(7);
        let mut rest = Vec::with_capacity(7);
        let mut cell = Vec::with_capacity(7);
        let mut row_rest = Vec::with_capacity(7);

        for z in z0..=z1 {
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            divide_poly(&remaining, &mut row, &mut rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(&mut remaining, &mut rest);
            if row.len() < 3 || z < 0 {
                continue;
            }

            let (min_x, max_x) = row
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= w {
                continue;
            }
            let x0 = x0.clamp(-1, w - 1);
            let x1 = x1.clamp(0, w - 1);

            for x in x0..=x1 {
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                divide_poly(&row, &mut cell, &mut row_rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(&mut row, &mut row_rest);
                if cell.len() < 3 || x < 0 {
                    continue;
                }

                let (span_min, span_max) = cell
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;
                if span_max < 0.0 || span_min > field_height {
                    continue;
                }
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(field_height);

                let max_height = Span::MAX_HEIGHT as i32;
                let min_index = ((span_min * inverse_cell_height).floor() as i32).clamp(0, max_height);
                let max_index = ((span_max * inverse_cell_height).ceil() as i32)
                    .max(min_index + 1)
                    .min(max_height);

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: min_index as u16,
                        max: max_index as u16,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3A) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Splits a convex polygon by the plane `axis = axis_offset`.
/// `below` receives the part on the negative side, `above` the part on the positive side.
fn divide_poly(
    input: &[Vec3A],
    below: &mut Vec<Vec3A>,
    above: &mut Vec<Vec3A>,
    axis_offset: f32,
    axis: Axis,
) {
    below.clear();
    above.clear();
    let n = input.len();
    if n == 0 {
        return;
    }
    let delta = |i: usize| axis_offset - axis.of(input[i]);

    let mut b = n - 1;
    for a in 0..n {
        let da = delta(a);
        let db = delta(b);
        let same_side = (da >= 0.0) == (db >= 0.0);
        if !same_side {
            let s = db / (db - da);
            let intersection = input[b] + (input[a] - input[b]) * s;
            below.push(intersection);
            above.push(intersection);
            // Points on the dividing line were just added.
            if da > 0.0 {
                below.push(input[a]);
            } else if da < 0.0 {
                above.push(input[a]);
            }
        } else if da >= 0.0 {
            below.push(input[a]);
            if da == 0.0 {
                above.push(input[a]);
            }
        } else {
            above.push(input[a]);
        }
        b = a;
    }
}

/// Errors that can occur when rasterizing a [`TriMesh`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be stored in the heightfield.
    #[error(transparent)]
    SpanInsertion(#[from] SpanInsertionError),
    /// Every triangle needs exactly one area type.
    #[error("trimesh has {triangles} triangles but {areas} area types")]
    AreaCountMismatch {
        /// Number of triangles
        triangles: usize,
        /// Number of area types
        areas: usize,
    },
    /// A triangle references a vertex that does not exist.
    #[error("vertex index {index} out of bounds for {len} vertices")]
    VertexIndexOutOfBounds {
        /// The offending index
        index: u32,
        /// Number of vertices in the trimesh
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::{Aabb3d, HeightfieldBuilder};

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::new(0.0, 0.0, 0.0),
                max: Vec3A::new(4.0, 4.0, 4.0),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn quad(y: f32, area: AreaType) -> TriMesh {
        TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(4.0, y, 0.0),
                Vec3A::new(4.0, y, 4.0),
                Vec3A::new(0.0, y, 4.0),
            ],
            indices: vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
            area_types: vec![area; 2],
        }
    }

    #[test]
    fn flat_quad_fills_every_column() {
        let mut heightfield = heightfield();
        heightfield
            .rasterize_triangles(&quad(1.0, AreaType::DEFAULT_WALKABLE), 1)
            .unwrap();
        for z in 0..4 {
            for x in 0..4 {
                let spans: Vec<_> = heightfield.column(x, z).collect();
                assert_eq!(spans.len(), 1, "column {x},{z}");
                let span = spans[0].1;
                assert_eq!(span.min(), 2);
                assert_eq!(span.max(), 3);
                assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    #[test]
    fn triangles_outside_the_field_are_ignored() {
        let mut heightfield = heightfield();
        let mut trimesh = quad(1.0, AreaType::DEFAULT_WALKABLE);
        for vertex in &mut trimesh.vertices {
            vertex.x += 10.0;
        }
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert!(heightfield.allocated_spans.is_empty());
    }

    #[test]
    fn mismatched_area_count_is_an_error() {
        let mut heightfield = heightfield();
        let mut trimesh = quad(1.0, AreaType::DEFAULT_WALKABLE);
        trimesh.area_types.pop();
        assert!(matches!(
            heightfield.rasterize_triangles(&trimesh, 1),
            Err(RasterizationError::AreaCountMismatch { .. })
        ));
    }

    #[test]
    fn divide_poly_splits_square() {
        let square = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&square, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v.x <= 1.0));
        assert!(above.iter().all(|v| v.x >= 1.0));
    }
}
