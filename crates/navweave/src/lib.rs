#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod distance_field;
mod erosion;
mod heightfield;
pub(crate) mod math;
mod pipeline;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod span;
mod trimesh;
mod watershed;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder};
pub use contours::{BuildContoursFlags, Contour, ContourSet, ContourVertex, RegionVertexId};
pub use detail_mesh::{DetailNavmesh, DetailNavmeshError, SubMesh};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use math::Aabb3d;
pub use pipeline::{BakeError, TileBuildOutput, TileIntermediates, WALKABLE_POLY_FLAGS, build_tile};
pub use poly_mesh::{PolygonMeshError, PolygonNavmesh, RC_MESH_NULL_IDX};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::TriMesh;
pub use watershed::RegionBuildError;
