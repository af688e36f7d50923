//! Runs every bake stage for a single tile.

use thiserror::Error;
use tracing::debug;

use crate::{
    Aabb3d, CompactHeightfield, CompactHeightfieldError, ContourSet, DetailNavmesh,
    DetailNavmeshError, Heightfield, HeightfieldBuilder, HeightfieldBuilderError, NavmeshConfig,
    PolygonMeshError, PolygonNavmesh, RasterizationError, RegionBuildError, TriMesh,
};

/// Polygon flag given to every polygon with a walkable area.
pub const WALKABLE_POLY_FLAGS: u16 = 1;

/// The meshes produced for one tile.
#[derive(Debug, Clone)]
pub struct TileBuildOutput {
    /// The convex polygon mesh in cell coordinates.
    pub polygon_mesh: PolygonNavmesh,
    /// The height detail of each polygon in world space.
    pub detail_mesh: DetailNavmesh,
    /// Retained intermediate results, when requested.
    pub intermediates: Option<TileIntermediates>,
}

/// Intermediate bake data kept for inspection and debug drawing.
#[derive(Debug, Clone)]
pub struct TileIntermediates {
    /// The filtered solid heightfield.
    pub heightfield: Heightfield,
    /// The eroded compact heightfield with regions.
    pub compact_heightfield: CompactHeightfield,
    /// The simplified contours.
    pub contour_set: ContourSet,
}

/// Bakes the tile covering `tile_bounds` from `trimesh`.
///
/// The heightfield is grown by the configured border on all sides so that obstacles of
/// neighboring tiles are taken into account. Triangles outside of it are ignored.
/// When `keep_debug_data` is set, the heightfield, compact heightfield and contours are returned
/// in [`TileBuildOutput::intermediates`].
pub fn build_tile(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
    tile_bounds: Aabb3d,
    keep_debug_data: bool,
) -> Result<TileBuildOutput, BakeError> {
    let pad = config.border_size as f32 * config.cell_size;
    let mut aabb = tile_bounds;
    aabb.min.x -= pad;
    aabb.min.z -= pad;
    aabb.max.x += pad;
    aabb.max.z += pad;

    let mut heightfield = HeightfieldBuilder {
        aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;

    heightfield.rasterize_triangles(trimesh, config.walkable_climb)?;

    // Remove overhangs caused by the conservative rasterization
    // and spans where the character cannot possibly stand.
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact_heightfield = CompactHeightfield::from_heightfield(
        &heightfield,
        config.walkable_height,
        config.walkable_climb,
    )?;
    compact_heightfield.erode_walkable_area(config.walkable_radius);
    compact_heightfield.build_distance_field();
    compact_heightfield.build_regions(
        config.border_size,
        config.min_region_area,
        config.merge_region_area,
    )?;

    let contour_set = compact_heightfield.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    let retained_contours = keep_debug_data.then(|| contour_set.clone());

    let mut polygon_mesh = contour_set.into_polygon_mesh(config.max_vertices_per_polygon)?;
    for (flags, area) in polygon_mesh.flags.iter_mut().zip(&polygon_mesh.areas) {
        if area.is_walkable() {
            *flags = WALKABLE_POLY_FLAGS;
        }
    }

    let detail_mesh = DetailNavmesh::new(
        &polygon_mesh,
        &compact_heightfield,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )?;

    debug!(
        polygons = polygon_mesh.polygon_count(),
        vertices = polygon_mesh.vertices.len(),
        detail_triangles = detail_mesh.triangles.len(),
        "baked tile"
    );

    let intermediates = retained_contours.map(|contour_set| TileIntermediates {
        heightfield,
        compact_heightfield,
        contour_set,
    });
    Ok(TileBuildOutput {
        polygon_mesh,
        detail_mesh,
        intermediates,
    })
}

/// Errors that abort a tile bake.
#[derive(Error, Debug)]
pub enum BakeError {
    /// The tile heightfield could not be allocated.
    #[error("Failed to create heightfield: {0}")]
    Heightfield(#[from] HeightfieldBuilderError),
    /// A triangle could not be rasterized.
    #[error("Failed to rasterize geometry: {0}")]
    Rasterization(#[from] RasterizationError),
    /// The compact heightfield could not be built.
    #[error("Failed to build compact heightfield: {0}")]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// Watershed partitioning failed.
    #[error("Failed to build regions: {0}")]
    Regions(#[from] RegionBuildError),
    /// The polygon mesh could not be built.
    #[error("Failed to build polygon mesh: {0}")]
    PolygonMesh(#[from] PolygonMeshError),
    /// The detail mesh could not be built.
    #[error("Failed to build detail mesh: {0}")]
    DetailMesh(#[from] DetailNavmeshError),
}
