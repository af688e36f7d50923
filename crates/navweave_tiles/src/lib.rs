//! Tiled navmesh storage for `navweave`.
//!
//! Tiles baked by [`navweave::build_tile`] are turned into [`TileBlob`]s by the
//! [`TileAssembler`], inserted into a [`NavmeshStore`], and queried through a [`NavmeshQuery`].
//! Polygons on the borders of neighboring tiles are linked automatically, so paths cross tile
//! borders seamlessly.

mod assembler;
mod math;
mod params;
pub mod persist;
mod poly_ref;
pub mod query;
mod store;
mod tile_data;

pub use assembler::TileAssembler;
pub use params::{NavmeshParams, NavmeshParamsError};
pub use persist::{PersistError, PersistedNavmesh, load_navmesh, save_navmesh};
pub use poly_ref::{PolyRef, RefEncoding, TileCoord, TileRef};
pub use query::{
    NavmeshQuery, PolyFlags, PolyPath, QueryError, QueryFilter, RaycastHit, StraightPathFlags,
    StraightPathPoint, SurfaceMove,
};
pub use store::{INTERNAL_LINK_SIDE, Link, MeshTile, NavmeshStore};
pub use tile_data::{
    DetailSubMesh, DetailTriangle, EXT_LINK, TileBlob, TileData, TileError, TileHeader,
    TilePolygon,
};

/// Geometry helpers shared with the crowd simulation.
pub mod geometry {
    pub use crate::math::{
        SegmentPolyIntersection, distance_pt_seg_sqr_2d, intersect_segment_poly_2d,
        point_in_polygon, tri_area_2d, v_equal,
    };
}
