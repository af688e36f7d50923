//! The navmesh file format.
//!
//! All values are little endian with fixed-width integers:
//!
//! | Field | Layout |
//! |---|---|
//! | World bounds | 6 × `f32` (min xyz, max xyz) |
//! | Tile counts | 2 × `i32` (x, z) |
//! | Navmesh params | origin 3 × `f32`, tile width `f32`, tile height `f32`, max tiles `i32`, max polys `i32` |
//! | Tiles | per tile, z outer and x inner: byte size `i32` (0 for an absent tile), then the tile bytes |

use glam::Vec3A;
use navweave::Aabb3d;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{NavmeshParams, NavmeshParamsError, NavmeshStore, TileBlob, TileCoord, TileError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct FileHeader {
    world_min: [f32; 3],
    world_max: [f32; 3],
    tiles_x: i32,
    tiles_z: i32,
    origin: [f32; 3],
    tile_width: f32,
    tile_height: f32,
    max_tiles: i32,
    max_polys: i32,
}

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// A navmesh loaded from a file.
#[derive(Debug, Clone)]
pub struct PersistedNavmesh {
    /// The bounds of the geometry the navmesh was baked from.
    pub world_bounds: Aabb3d,
    /// Number of tiles along the x-axis.
    pub tiles_x: i32,
    /// Number of tiles along the z-axis.
    pub tiles_z: i32,
    /// The navmesh with every stored tile resident.
    pub store: NavmeshStore,
}

/// Serializes `store` together with the bounds and tile counts it was baked with.
pub fn save_navmesh(
    store: &NavmeshStore,
    world_bounds: &Aabb3d,
    tiles_x: i32,
    tiles_z: i32,
) -> Result<Vec<u8>, PersistError> {
    let params = store.params();
    let header = FileHeader {
        world_min: world_bounds.min.to_array(),
        world_max: world_bounds.max.to_array(),
        tiles_x,
        tiles_z,
        origin: params.origin.to_array(),
        tile_width: params.tile_width,
        tile_height: params.tile_height,
        max_tiles: params.max_tiles as i32,
        max_polys: params.max_polys as i32,
    };
    let mut bytes = bincode::serde::encode_to_vec(header, config())?;

    let mut tiles = 0;
    for z in 0..tiles_z {
        for x in 0..tiles_x {
            match store.tile_at(TileCoord::new(x, z)) {
                Some(tile) => {
                    let blob = tile.blob().as_bytes();
                    bytes.extend_from_slice(&(blob.len() as i32).to_le_bytes());
                    bytes.extend_from_slice(blob);
                    tiles += 1;
                }
                None => bytes.extend_from_slice(&0_i32.to_le_bytes()),
            }
        }
    }
    debug!(tiles, bytes = bytes.len(), "saved navmesh");
    Ok(bytes)
}

/// Reads a navmesh written by [`save_navmesh`].
///
/// Fails on truncated input, invalid params or any tile the store rejects.
pub fn load_navmesh(bytes: &[u8]) -> Result<PersistedNavmesh, PersistError> {
    let (header, mut offset): (FileHeader, usize) =
        bincode::serde::decode_from_slice(bytes, config())?;
    if header.tiles_x < 0 || header.tiles_z < 0 || header.max_tiles < 0 || header.max_polys < 0 {
        return Err(PersistError::NegativeCount);
    }

    let mut store = NavmeshStore::new(NavmeshParams {
        origin: Vec3A::from_array(header.origin),
        tile_width: header.tile_width,
        tile_height: header.tile_height,
        max_tiles: header.max_tiles as u32,
        max_polys: header.max_polys as u32,
    })?;

    for _ in 0..header.tiles_z as i64 * header.tiles_x as i64 {
        let size = read_i32(bytes, &mut offset)?;
        if size < 0 {
            return Err(PersistError::NegativeCount);
        }
        if size == 0 {
            continue;
        }
        let end = offset + size as usize;
        let tile = bytes.get(offset..end).ok_or(PersistError::Truncated {
            needed: end,
            available: bytes.len(),
        })?;
        store.add_tile(TileBlob::from_bytes(tile.to_vec()))?;
        offset = end;
    }
    debug!(tiles = store.tile_count(), "loaded navmesh");

    Ok(PersistedNavmesh {
        world_bounds: Aabb3d {
            min: Vec3A::from_array(header.world_min),
            max: Vec3A::from_array(header.world_max),
        },
        tiles_x: header.tiles_x,
        tiles_z: header.tiles_z,
        store,
    })
}

fn read_i32(bytes: &[u8], offset: &mut usize) -> Result<i32, PersistError> {
    let end = *offset + 4;
    let value = bytes
        .get(*offset..end)
        .and_then(|slice| slice.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or(PersistError::Truncated {
            needed: end,
            available: bytes.len(),
        })?;
    *offset = end;
    Ok(value)
}

/// Errors when saving or loading a navmesh file.
#[derive(Error, Debug)]
pub enum PersistError {
    /// The header could not be serialized.
    #[error("Failed to encode navmesh header: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// The header could not be read.
    #[error("Failed to decode navmesh header: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// The file ends before all tiles were read.
    #[error("Navmesh file is truncated: needed {needed} bytes but only {available} are present")]
    Truncated {
        /// The number of bytes needed to read the next field.
        needed: usize,
        /// The size of the file.
        available: usize,
    },
    /// A count or size in the file is negative.
    #[error("Navmesh file contains a negative count")]
    NegativeCount,
    /// The stored params are invalid.
    #[error("Invalid navmesh params: {0}")]
    Params(#[from] NavmeshParamsError),
    /// A stored tile was rejected.
    #[error("Failed to add tile: {0}")]
    Tile(#[from] TileError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetailSubMesh, DetailTriangle, TileData, TileHeader, TilePolygon};

    fn empty_store() -> NavmeshStore {
        NavmeshStore::new(NavmeshParams::for_tile_grid(Vec3A::new(1.0, 2.0, 3.0), 7.5, 2, 3))
            .unwrap()
    }

    #[test]
    fn header_layout_is_fixed_width() {
        let bounds = Aabb3d {
            min: Vec3A::new(1.0, 2.0, 3.0),
            max: Vec3A::new(4.0, 5.0, 6.0),
        };
        let bytes = save_navmesh(&empty_store(), &bounds, 2, 3).unwrap();
        // 6 bounds + 2 counts + 7 params + 6 empty tiles, 4 bytes each.
        assert_eq!(bytes.len(), (6 + 2 + 7 + 6) * 4);
        assert_eq!(&bytes[0..4], &1.0_f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &2_i32.to_le_bytes());
        assert_eq!(&bytes[28..32], &3_i32.to_le_bytes());
        assert_eq!(&bytes[44..48], &7.5_f32.to_le_bytes());
        assert_eq!(&bytes[52..56], &6_i32.to_le_bytes());
    }

    #[test]
    fn empty_navmesh_round_trips() {
        let bounds = Aabb3d {
            min: Vec3A::ZERO,
            max: Vec3A::splat(10.0),
        };
        let bytes = save_navmesh(&empty_store(), &bounds, 2, 3).unwrap();
        let loaded = load_navmesh(&bytes).unwrap();
        assert_eq!(loaded.world_bounds, bounds);
        assert_eq!((loaded.tiles_x, loaded.tiles_z), (2, 3));
        assert_eq!(loaded.store.params(), empty_store().params());
        assert_eq!(loaded.store.tile_count(), 0);
    }

    #[test]
    fn truncated_files_are_rejected() {
        let bytes = save_navmesh(&empty_store(), &Aabb3d::default(), 2, 3).unwrap();
        assert!(matches!(
            load_navmesh(&bytes[..bytes.len() - 2]),
            Err(PersistError::Truncated { .. })
        ));
        assert!(matches!(
            load_navmesh(&bytes[..10]),
            Err(PersistError::Decode(_))
        ));
    }

    #[test]
    fn overflowing_detail_ranges_are_rejected() {
        let tile = TileData {
            header: TileHeader {
                magic: TileHeader::MAGIC,
                version: TileHeader::VERSION,
                coord: TileCoord::new(0, 0),
                bounds: Aabb3d::default(),
                walkable_height: 2.0,
                walkable_radius: 0.5,
                walkable_climb: 0.5,
            },
            vertices: vec![Vec3A::ZERO, Vec3A::Z, Vec3A::X],
            polygons: vec![TilePolygon {
                vertices: vec![0, 1, 2],
                neighbors: vec![0, 0, 0],
                flags: 1,
                area: 63,
            }],
            detail_meshes: vec![DetailSubMesh {
                vertex_base: u32::MAX,
                vertex_count: 2,
                triangle_base: 0,
                triangle_count: 1,
            }],
            detail_vertices: vec![Vec3A::ZERO, Vec3A::Z, Vec3A::X],
            detail_triangles: vec![DetailTriangle {
                indices: [0, 1, 2],
                flags: 0,
            }],
        };
        let blob = tile.to_blob().unwrap();
        let store =
            NavmeshStore::new(NavmeshParams::for_tile_grid(Vec3A::ZERO, 8.0, 1, 1)).unwrap();
        let mut bytes = save_navmesh(&store, &Aabb3d::default(), 1, 1).unwrap();
        bytes.truncate(bytes.len() - 4);
        bytes.extend_from_slice(&(blob.len() as i32).to_le_bytes());
        bytes.extend_from_slice(blob.as_bytes());

        assert!(matches!(
            load_navmesh(&bytes),
            Err(PersistError::Tile(TileError::Corrupt(_)))
        ));
    }
}
