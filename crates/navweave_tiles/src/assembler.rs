use glam::Vec3A;
use navweave::{NavmeshConfig, RC_MESH_NULL_IDX, TileBuildOutput};
use tracing::debug;

use crate::{
    TileCoord,
    tile_data::{
        DetailSubMesh, DetailTriangle, EXT_LINK, TileBlob, TileData, TileError, TileHeader,
        TilePolygon,
    },
};

/// Turns baked polygon and detail meshes into tiles the [`NavmeshStore`](crate::NavmeshStore)
/// understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileAssembler {
    /// The height of the agents the tiles were baked for. `[Units: wu]`
    pub walkable_height: f32,
    /// The radius of the agents the tiles were baked for. `[Units: wu]`
    pub walkable_radius: f32,
    /// The maximum step height the agents can climb. `[Units: wu]`
    ///
    /// Used as the vertical tolerance when stitching tiles together.
    pub walkable_climb: f32,
}

impl TileAssembler {
    /// Converts the voxel quantities of `config` into world units.
    pub fn from_config(config: &NavmeshConfig) -> Self {
        Self {
            walkable_height: config.walkable_height as f32 * config.cell_height,
            walkable_radius: config.walkable_radius as f32 * config.cell_size,
            walkable_climb: config.walkable_climb as f32 * config.cell_height,
        }
    }

    /// Assembles and serializes the tile at `coord`.
    ///
    /// Returns `Ok(None)` if the bake produced no polygons. Such tiles stay absent.
    pub fn assemble(
        &self,
        output: &TileBuildOutput,
        coord: TileCoord,
    ) -> Result<Option<TileBlob>, TileError> {
        self.assemble_data(output, coord)?
            .map(|data| data.to_blob())
            .transpose()
    }

    /// Assembles the tile at `coord` without serializing it.
    pub fn assemble_data(
        &self,
        output: &TileBuildOutput,
        coord: TileCoord,
    ) -> Result<Option<TileData>, TileError> {
        let mesh = &output.polygon_mesh;
        let detail = &output.detail_mesh;
        if mesh.polygon_count() == 0 {
            return Ok(None);
        }
        if mesh.vertices.len() >= u16::MAX as usize {
            return Err(TileError::TooManyVertices(mesh.vertices.len()));
        }

        let origin = mesh.aabb.min;
        let cell = Vec3A::new(mesh.cell_size, mesh.cell_height, mesh.cell_size);
        let vertices = mesh
            .vertices
            .iter()
            .map(|v| origin + v.as_vec3a() * cell)
            .collect::<Vec<_>>();

        let polygons = (0..mesh.polygon_count())
            .map(|i| TilePolygon {
                vertices: mesh.polygon_vertices(i).to_vec(),
                neighbors: mesh
                    .polygon_neighbors(i)
                    .iter()
                    .map(|&neighbor| tile_neighbor(neighbor))
                    .collect(),
                flags: mesh.flags[i],
                area: mesh.areas[i].0,
            })
            .collect::<Vec<_>>();

        let mut detail_meshes = Vec::with_capacity(detail.meshes.len());
        let mut detail_vertices = Vec::with_capacity(detail.vertices.len());
        let mut detail_triangles = Vec::with_capacity(detail.triangles.len());
        for i in 0..detail.meshes.len() {
            detail_meshes.push(DetailSubMesh {
                vertex_base: detail_vertices.len() as u32,
                vertex_count: detail.meshes[i].vertex_count as u32,
                triangle_base: detail_triangles.len() as u32,
                triangle_count: detail.meshes[i].triangle_count as u32,
            });
            detail_vertices.extend_from_slice(detail.submesh_vertices(i));
            detail_triangles.extend(detail.submesh_triangles(i).iter().map(
                |(indices, flags)| DetailTriangle {
                    indices: indices.to_array(),
                    flags: *flags,
                },
            ));
        }

        let mut bounds = mesh.aabb;
        for vertex in vertices.iter().chain(&detail_vertices) {
            bounds.min = bounds.min.min(*vertex);
            bounds.max = bounds.max.max(*vertex);
        }

        debug!(
            x = coord.x,
            z = coord.z,
            polygons = polygons.len(),
            "assembled tile"
        );
        Ok(Some(TileData {
            header: TileHeader {
                magic: TileHeader::MAGIC,
                version: TileHeader::VERSION,
                coord,
                bounds,
                walkable_height: self.walkable_height,
                walkable_radius: self.walkable_radius,
                walkable_climb: self.walkable_climb,
            },
            vertices,
            polygons,
            detail_meshes,
            detail_vertices,
            detail_triangles,
        }))
    }
}

/// Maps a polygon mesh neighbor entry to a tile neighbor entry.
///
/// Portal sides of the polygon mesh are `0: -x`, `1: +z`, `2: +x`, `3: -z`.
fn tile_neighbor(neighbor: u16) -> u16 {
    if neighbor == RC_MESH_NULL_IDX {
        0
    } else if neighbor & 0x8000 != 0 {
        match neighbor & 0xf {
            0 => EXT_LINK | 4,
            1 => EXT_LINK | 2,
            2 => EXT_LINK,
            3 => EXT_LINK | 6,
            _ => 0,
        }
    } else {
        neighbor + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_sides_map_to_tile_sides() {
        assert_eq!(tile_neighbor(0x8000), EXT_LINK | 4);
        assert_eq!(tile_neighbor(0x8001), EXT_LINK | 2);
        assert_eq!(tile_neighbor(0x8002), EXT_LINK);
        assert_eq!(tile_neighbor(0x8003), EXT_LINK | 6);
        assert_eq!(tile_neighbor(RC_MESH_NULL_IDX), 0);
        assert_eq!(tile_neighbor(4), 5);
    }

    #[test]
    fn climb_is_converted_to_world_units() {
        let config = navweave::NavmeshConfigBuilder::default().build();
        let assembler = TileAssembler::from_config(&config);
        approx::assert_relative_eq!(assembler.walkable_climb, 1.5, epsilon = 0.11);
        approx::assert_relative_eq!(assembler.walkable_height, 2.0, epsilon = 0.11);
    }
}
