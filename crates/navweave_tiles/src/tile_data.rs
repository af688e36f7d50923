//! The contents of a baked tile and its binary form.

use glam::Vec3A;
use navweave::Aabb3d;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TileCoord;

/// Marks a polygon edge that lies on the tile border. The low bits hold the side.
pub const EXT_LINK: u16 = 0x8000;

/// Everything the store needs to know about a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    /// Identifies the blob and the tile it belongs to.
    pub header: TileHeader,
    /// Polygon vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The convex polygons of the tile.
    pub polygons: Vec<TilePolygon>,
    /// One height detail mesh per polygon.
    pub detail_meshes: Vec<DetailSubMesh>,
    /// Detail vertices in world space.
    pub detail_vertices: Vec<Vec3A>,
    /// Detail triangles, indexed relative to their sub-mesh's first vertex.
    pub detail_triangles: Vec<DetailTriangle>,
}

/// Tile metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileHeader {
    /// Always [`TileHeader::MAGIC`].
    pub magic: u32,
    /// Always [`TileHeader::VERSION`].
    pub version: u32,
    /// The grid coordinate of the tile.
    pub coord: TileCoord,
    /// The bounds of the tile's polygons.
    pub bounds: Aabb3d,
    /// The height of the agents the tile was baked for. `[Units: wu]`
    pub walkable_height: f32,
    /// The radius of the agents the tile was baked for. `[Units: wu]`
    pub walkable_radius: f32,
    /// The maximum step height of the agents the tile was baked for. `[Units: wu]`
    pub walkable_climb: f32,
}

impl TileHeader {
    /// `NWTL` in little endian.
    pub const MAGIC: u32 = u32::from_le_bytes(*b"NWTL");
    /// The current tile format version.
    pub const VERSION: u32 = 1;
}

/// A convex polygon of a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePolygon {
    /// Indices into [`TileData::vertices`].
    pub vertices: Vec<u16>,
    /// One entry per edge: `0` for a wall, `i + 1` for polygon `i` of the same tile, or
    /// [`EXT_LINK`] combined with the tile side for edges on the tile border.
    pub neighbors: Vec<u16>,
    /// User flags, see [`PolyFlags`](crate::PolyFlags).
    pub flags: u16,
    /// The area id.
    pub area: u8,
}

/// The range of detail vertices and triangles of one polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DetailSubMesh {
    pub vertex_base: u32,
    pub vertex_count: u32,
    pub triangle_base: u32,
    pub triangle_count: u32,
}

/// A detail triangle and its boundary edge flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailTriangle {
    /// Vertex indices relative to the sub-mesh.
    pub indices: [u16; 3],
    /// Two bits per edge, set when the edge lies on the polygon boundary.
    pub flags: u8,
}

impl TileData {
    /// Serializes the tile into a blob.
    pub fn to_blob(&self) -> Result<TileBlob, TileError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        Ok(TileBlob(bytes))
    }

    /// The detail vertices and triangles of polygon `poly`.
    pub fn detail(&self, poly: usize) -> Option<(&[Vec3A], &[DetailTriangle])> {
        let mesh = self.detail_meshes.get(poly)?;
        let vertex_end = mesh.vertex_base.checked_add(mesh.vertex_count)?;
        let triangle_end = mesh.triangle_base.checked_add(mesh.triangle_count)?;
        let vertices = self
            .detail_vertices
            .get(mesh.vertex_base as usize..vertex_end as usize)?;
        let triangles = self
            .detail_triangles
            .get(mesh.triangle_base as usize..triangle_end as usize)?;
        Some((vertices, triangles))
    }

    /// Checks the header and the internal consistency of the indices.
    pub fn validate(&self) -> Result<(), TileError> {
        if self.header.magic != TileHeader::MAGIC {
            return Err(TileError::WrongMagic(self.header.magic));
        }
        if self.header.version != TileHeader::VERSION {
            return Err(TileError::WrongVersion(self.header.version));
        }
        if self.detail_meshes.len() != self.polygons.len() {
            return Err(TileError::Corrupt("detail mesh count differs from polygon count"));
        }
        for polygon in &self.polygons {
            if polygon.vertices.len() < 3 || polygon.vertices.len() != polygon.neighbors.len() {
                return Err(TileError::Corrupt("polygon with fewer than 3 vertices"));
            }
            if polygon
                .vertices
                .iter()
                .any(|&v| v as usize >= self.vertices.len())
            {
                return Err(TileError::Corrupt("polygon vertex out of range"));
            }
            if polygon.neighbors.iter().any(|&n| {
                n & EXT_LINK == 0 && n != 0 && n as usize > self.polygons.len()
            }) {
                return Err(TileError::Corrupt("polygon neighbor out of range"));
            }
        }
        for i in 0..self.polygons.len() {
            let Some((vertices, triangles)) = self.detail(i) else {
                return Err(TileError::Corrupt("detail mesh out of range"));
            };
            if triangles
                .iter()
                .flat_map(|t| t.indices)
                .any(|v| v as usize >= vertices.len())
            {
                return Err(TileError::Corrupt("detail vertex out of range"));
            }
        }
        Ok(())
    }
}

/// The serialized form of a [`TileData`], as stored in navmesh files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileBlob(Vec<u8>);

impl TileBlob {
    /// Wraps raw bytes. They are only checked when decoded.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unwraps the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the blob holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserializes and validates the tile.
    pub fn decode(&self) -> Result<TileData, TileError> {
        let (data, read): (TileData, usize) =
            bincode::serde::decode_from_slice(&self.0, bincode::config::standard())?;
        if read != self.0.len() {
            return Err(TileError::Corrupt("trailing bytes after tile"));
        }
        data.validate()?;
        Ok(data)
    }
}

/// Errors when assembling, decoding or inserting tiles.
#[derive(Error, Debug)]
pub enum TileError {
    /// The tile could not be serialized.
    #[error("Failed to encode tile: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// The blob is not a valid tile.
    #[error("Failed to decode tile: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// The blob does not start with [`TileHeader::MAGIC`].
    #[error("Wrong tile magic {0:#x}")]
    WrongMagic(u32),
    /// The blob was written by an incompatible version.
    #[error("Unsupported tile version {0}")]
    WrongVersion(u32),
    /// The blob decoded but its indices are inconsistent.
    #[error("Corrupt tile: {0}")]
    Corrupt(&'static str),
    /// The tile has more polygons than the store allows per tile.
    #[error("Tile has {count} polygons but the navmesh allows at most {max}")]
    TooManyPolygons {
        /// Polygons in the tile.
        count: usize,
        /// Polygons allowed per tile.
        max: u32,
    },
    /// The tile has more vertices than a polygon index can address.
    #[error("Tile has {0} vertices but at most 65535 are supported")]
    TooManyVertices(usize),
    /// Every tile slot is in use.
    #[error("The navmesh is full ({0} tiles)")]
    OutOfTiles(u32),
}
