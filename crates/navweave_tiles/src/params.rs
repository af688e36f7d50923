use glam::Vec3A;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poly_ref::RefEncoding;

/// The global parameters of a [`NavmeshStore`](crate::NavmeshStore).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavmeshParams {
    /// The world-space origin of the tile grid.
    pub origin: Vec3A,
    /// The width of each tile along the x-axis. `[Limit: > 0] [Units: wu]`
    pub tile_width: f32,
    /// The height of each tile along the z-axis. `[Limit: > 0] [Units: wu]`
    pub tile_height: f32,
    /// The maximum number of tiles the store can hold. `[Limit: > 0]`
    pub max_tiles: u32,
    /// The maximum number of polygons each tile can hold. `[Limit: > 0]`
    pub max_polys: u32,
}

impl NavmeshParams {
    /// The minimum number of bits left for the salt of a [`PolyRef`](crate::PolyRef).
    pub const MIN_SALT_BITS: u32 = 10;

    /// Creates parameters for a grid of `tiles_x` by `tiles_z` square tiles.
    ///
    /// The polygon budget is the largest power of two that still leaves
    /// [`Self::MIN_SALT_BITS`] bits for the salt. Grids too large to address are rejected by
    /// [`NavmeshParams::encoding`].
    pub fn for_tile_grid(origin: Vec3A, tile_size: f32, tiles_x: u32, tiles_z: u32) -> Self {
        let max_tiles = tiles_x.saturating_mul(tiles_z).max(1);
        let tile_bits = index_bits(max_tiles);
        let poly_bits = (32 - Self::MIN_SALT_BITS).saturating_sub(tile_bits);
        Self {
            origin,
            tile_width: tile_size,
            tile_height: tile_size,
            max_tiles,
            max_polys: 1 << poly_bits,
        }
    }

    /// Checks the parameters and computes the bit layout of polygon references.
    pub fn encoding(&self) -> Result<RefEncoding, NavmeshParamsError> {
        if !(self.tile_width > 0.0 && self.tile_height > 0.0) {
            return Err(NavmeshParamsError::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if self.max_tiles == 0 || self.max_polys == 0 {
            return Err(NavmeshParamsError::ZeroCapacity);
        }
        let tile_bits = index_bits(self.max_tiles);
        let poly_bits = index_bits(self.max_polys);
        let salt_bits = 32_u32.saturating_sub(tile_bits + poly_bits).min(31);
        if salt_bits < Self::MIN_SALT_BITS {
            return Err(NavmeshParamsError::NotEnoughSaltBits {
                tile_bits,
                poly_bits,
            });
        }
        Ok(RefEncoding {
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Returns the grid coordinate of the tile containing `position`.
    pub fn tile_coord_at(&self, position: Vec3A) -> crate::TileCoord {
        crate::TileCoord {
            x: ((position.x - self.origin.x) / self.tile_width).floor() as i32,
            z: ((position.z - self.origin.z) / self.tile_height).floor() as i32,
        }
    }
}

/// Bits needed to address `count` items.
fn index_bits(count: u32) -> u32 {
    count.checked_next_power_of_two().map_or(u32::BITS, u32::ilog2)
}

/// Errors when validating [`NavmeshParams`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavmeshParamsError {
    /// Tiles must have a positive size.
    #[error("Tile size must be positive, got {width} x {height}")]
    InvalidTileSize {
        /// The requested tile width.
        width: f32,
        /// The requested tile height.
        height: f32,
    },
    /// The store must be able to hold at least one tile and one polygon.
    #[error("Tile and polygon capacities must be positive")]
    ZeroCapacity,
    /// The tile and polygon capacities leave too few bits for the salt.
    #[error(
        "{tile_bits} tile bits and {poly_bits} polygon bits leave fewer than {} salt bits",
        NavmeshParams::MIN_SALT_BITS
    )]
    NotEnoughSaltBits {
        /// Bits needed to address every tile.
        tile_bits: u32,
        /// Bits needed to address every polygon of a tile.
        poly_bits: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_grid_leaves_ten_salt_bits() {
        let params = NavmeshParams::for_tile_grid(Vec3A::ZERO, 76.8, 3, 5);
        assert_eq!(params.max_tiles, 15);
        assert_eq!(params.max_polys, 1 << 18);
        let encoding = params.encoding().unwrap();
        assert_eq!(encoding.tile_bits, 4);
        assert_eq!(encoding.poly_bits, 18);
        assert_eq!(encoding.salt_bits, 10);
    }

    #[test]
    fn too_many_polygons_are_rejected() {
        let params = NavmeshParams {
            origin: Vec3A::ZERO,
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 1 << 12,
            max_polys: 1 << 12,
        };
        assert_eq!(
            params.encoding(),
            Err(NavmeshParamsError::NotEnoughSaltBits {
                tile_bits: 12,
                poly_bits: 12
            })
        );
    }

    #[test]
    fn huge_tile_grids_are_rejected() {
        let params = NavmeshParams::for_tile_grid(Vec3A::ZERO, 1.0, 100_000, 100_000);
        assert_eq!(params.max_tiles, u32::MAX);
        assert!(matches!(
            params.encoding(),
            Err(NavmeshParamsError::NotEnoughSaltBits { tile_bits: 32, .. })
        ));

        let params = NavmeshParams::for_tile_grid(Vec3A::ZERO, 1.0, 1 << 16, 1 << 16);
        assert!(params.encoding().is_err());
    }

    #[test]
    fn tile_coord_floors_negative_positions() {
        let params = NavmeshParams::for_tile_grid(Vec3A::new(10.0, 0.0, 10.0), 5.0, 2, 2);
        assert_eq!(
            params.tile_coord_at(Vec3A::new(9.0, 0.0, 16.0)),
            crate::TileCoord { x: -1, z: 1 }
        );
    }
}
