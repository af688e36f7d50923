use serde::{Deserialize, Serialize};

/// Integer coordinate of a tile in the navmesh grid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Tile index along the x-axis.
    pub x: i32,
    /// Tile index along the z-axis.
    pub z: i32,
}

impl TileCoord {
    /// Creates a new tile coordinate.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The coordinate of the neighboring tile across `side`.
    ///
    /// Sides are numbered counter-clockwise in steps of two, starting at `+x`:
    /// `0` is `+x`, `2` is `+z`, `4` is `-x` and `6` is `-z`.
    pub fn neighbor(self, side: u8) -> Self {
        match side & 7 {
            0 => Self::new(self.x + 1, self.z),
            2 => Self::new(self.x, self.z + 1),
            4 => Self::new(self.x - 1, self.z),
            6 => Self::new(self.x, self.z - 1),
            _ => self,
        }
    }
}

/// The side of a tile opposite to `side`.
#[inline]
pub(crate) fn opposite_side(side: u8) -> u8 {
    (side + 4) & 7
}

/// A reference to a polygon of a resident tile.
///
/// The reference packs a salt, the tile slot and the polygon index. The salt of a slot changes
/// whenever its tile is removed, so references to removed tiles stop resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolyRef(pub u32);

/// A reference to a resident tile. Equal to the reference of its first polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileRef(pub u32);

/// Bit layout of [`PolyRef`]s, derived from [`NavmeshParams`](crate::NavmeshParams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEncoding {
    /// Bits used for the salt.
    pub salt_bits: u32,
    /// Bits used for the tile slot.
    pub tile_bits: u32,
    /// Bits used for the polygon index.
    pub poly_bits: u32,
}

impl RefEncoding {
    /// Packs a polygon reference.
    #[inline]
    pub fn encode(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        PolyRef(
            (salt << (self.poly_bits + self.tile_bits)) | (tile << self.poly_bits) | poly,
        )
    }

    /// Unpacks a polygon reference into salt, tile slot and polygon index.
    #[inline]
    pub fn decode(&self, poly_ref: PolyRef) -> (u32, u32, u32) {
        (
            (poly_ref.0 >> (self.poly_bits + self.tile_bits)) & self.salt_mask(),
            (poly_ref.0 >> self.poly_bits) & mask(self.tile_bits),
            poly_ref.0 & mask(self.poly_bits),
        )
    }

    /// The reference of a tile slot.
    #[inline]
    pub fn tile_ref(&self, salt: u32, tile: u32) -> TileRef {
        TileRef(self.encode(salt, tile, 0).0)
    }

    /// The polygon reference with its polygon index replaced.
    #[inline]
    pub fn with_poly(&self, base: TileRef, poly: u32) -> PolyRef {
        PolyRef(base.0 | poly)
    }

    #[inline]
    pub(crate) fn salt_mask(&self) -> u32 {
        mask(self.salt_bits)
    }
}

#[inline]
fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_unpack_to_their_parts() {
        let encoding = RefEncoding {
            salt_bits: 10,
            tile_bits: 4,
            poly_bits: 18,
        };
        let poly_ref = encoding.encode(1023, 15, 70_000);
        assert_eq!(encoding.decode(poly_ref), (1023, 15, 70_000));
        let base = encoding.tile_ref(3, 2);
        assert_eq!(encoding.decode(encoding.with_poly(base, 9)), (3, 2, 9));
    }

    #[test]
    fn neighbors_are_opposite() {
        let coord = TileCoord::new(2, 3);
        for side in [0, 2, 4, 6] {
            assert_eq!(coord.neighbor(side).neighbor(opposite_side(side)), coord);
        }
        assert_eq!(coord.neighbor(0), TileCoord::new(3, 3));
        assert_eq!(coord.neighbor(6), TileCoord::new(2, 2));
    }
}
