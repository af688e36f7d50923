//! The tiled navmesh: resident tiles, their links and polygon references.

use std::collections::HashMap;

use glam::{Vec2, Vec3A};
use navweave::Aabb3d;
use tracing::debug;

use crate::{
    NavmeshParams, NavmeshParamsError, PolyRef, RefEncoding, TileCoord, TileRef,
    poly_ref::opposite_side,
    tile_data::{EXT_LINK, TileBlob, TileData, TileError, TilePolygon},
};

/// Side value of links between polygons of the same tile.
pub const INTERNAL_LINK_SIDE: u8 = 0xff;

/// Maximum number of polygons one border edge can connect to.
const MAX_CONNECTIONS: usize = 4;

/// A connection from a polygon edge to another polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// The polygon on the other side of the edge.
    pub target: PolyRef,
    /// The index of the edge of the source polygon.
    pub edge: u8,
    /// The tile side the edge lies on, or [`INTERNAL_LINK_SIDE`].
    pub side: u8,
    /// Start of the shared part of the edge, in 1/255th of the edge length.
    pub bmin: u8,
    /// End of the shared part of the edge, in 1/255th of the edge length.
    pub bmax: u8,
}

impl Link {
    /// Returns `true` if the link connects polygons of different tiles.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.side != INTERNAL_LINK_SIDE
    }

    /// Returns `true` if the link covers only part of its edge.
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.is_external() && (self.bmin != 0 || self.bmax != 255)
    }
}

/// A tile resident in a [`NavmeshStore`].
#[derive(Debug, Clone)]
pub struct MeshTile {
    data: TileData,
    blob: TileBlob,
    tile_ref: TileRef,
    links: Vec<Vec<Link>>,
    poly_bounds: Vec<Aabb3d>,
}

impl MeshTile {
    fn new(data: TileData, blob: TileBlob, tile_ref: TileRef, encoding: &RefEncoding) -> Self {
        let links = data
            .polygons
            .iter()
            .map(|polygon| {
                polygon
                    .neighbors
                    .iter()
                    .enumerate()
                    .filter(|(_, neighbor)| **neighbor != 0 && **neighbor & EXT_LINK == 0)
                    .map(|(edge, neighbor)| Link {
                        target: encoding.with_poly(tile_ref, *neighbor as u32 - 1),
                        edge: edge as u8,
                        side: INTERNAL_LINK_SIDE,
                        bmin: 0,
                        bmax: 0,
                    })
                    .collect()
            })
            .collect();
        let poly_bounds = (0..data.polygons.len())
            .map(|i| {
                let mut vertices = poly_vertices(&data, &data.polygons[i]);
                if let Some((detail, _)) = data.detail(i) {
                    vertices.extend_from_slice(detail);
                }
                Aabb3d::from_verts(&vertices).unwrap_or_default()
            })
            .collect();
        Self {
            data,
            blob,
            tile_ref,
            links,
            poly_bounds,
        }
    }

    /// The decoded tile.
    #[inline]
    pub fn data(&self) -> &TileData {
        &self.data
    }

    /// The blob the tile was inserted from.
    #[inline]
    pub fn blob(&self) -> &TileBlob {
        &self.blob
    }

    /// The grid coordinate of the tile.
    #[inline]
    pub fn coord(&self) -> TileCoord {
        self.data.header.coord
    }

    /// The reference of the tile.
    #[inline]
    pub fn tile_ref(&self) -> TileRef {
        self.tile_ref
    }

    /// Number of polygons in the tile.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.data.polygons.len()
    }

    /// The links of polygon `poly`.
    #[inline]
    pub fn links(&self, poly: usize) -> &[Link] {
        &self.links[poly]
    }

    /// The world-space bounds of polygon `poly` including its height detail.
    #[inline]
    pub fn poly_bounds(&self, poly: usize) -> &Aabb3d {
        &self.poly_bounds[poly]
    }

    /// The world-space vertices of polygon `poly`.
    pub fn poly_vertices(&self, poly: usize) -> Vec<Vec3A> {
        poly_vertices(&self.data, &self.data.polygons[poly])
    }

    /// Finds the polygons of this tile with a border edge on `side` that overlaps the segment
    /// `va`-`vb`. Returns each polygon index with the overlapping range along the border.
    fn find_connecting_polys(&self, va: Vec3A, vb: Vec3A, side: u8) -> Vec<(usize, f32, f32)> {
        let (amin, amax) = slab_end_points(va, vb, side);
        let apos = slab_coord(va, side);
        let mut connections = Vec::new();
        let expected = EXT_LINK | side as u16;
        for (i, polygon) in self.data.polygons.iter().enumerate() {
            let count = polygon.vertices.len();
            for j in 0..count {
                if polygon.neighbors[j] != expected {
                    continue;
                }
                let vc = self.data.vertices[polygon.vertices[j] as usize];
                let vd = self.data.vertices[polygon.vertices[(j + 1) % count] as usize];
                if (apos - slab_coord(vc, side)).abs() > 0.01 {
                    continue;
                }
                let (bmin, bmax) = slab_end_points(vc, vd, side);
                if !overlap_slabs(amin, amax, bmin, bmax, 0.01, self.data.header.walkable_climb) {
                    continue;
                }
                if connections.len() < MAX_CONNECTIONS {
                    connections.push((i, amin.x.max(bmin.x), amax.x.min(bmax.x)));
                }
                break;
            }
        }
        connections
    }
}

fn poly_vertices(data: &TileData, polygon: &TilePolygon) -> Vec<Vec3A> {
    polygon
        .vertices
        .iter()
        .map(|&v| data.vertices[v as usize])
        .collect()
}

/// The coordinate of a vertex across the border of `side`.
fn slab_coord(v: Vec3A, side: u8) -> f32 {
    if side == 0 || side == 4 { v.x } else { v.z }
}

/// The end points of a border edge as (coordinate along the border, height), sorted along the
/// border.
fn slab_end_points(va: Vec3A, vb: Vec3A, side: u8) -> (Vec2, Vec2) {
    let (a, b) = if side == 0 || side == 4 {
        (Vec2::new(va.z, va.y), Vec2::new(vb.z, vb.y))
    } else {
        (Vec2::new(va.x, va.y), Vec2::new(vb.x, vb.y))
    };
    if a.x < b.x { (a, b) } else { (b, a) }
}

/// Checks whether two border edges share a stretch of the border within `py` vertically.
/// The edges are shrunk by `px` so that edges touching only at their end points do not overlap.
fn overlap_slabs(amin: Vec2, amax: Vec2, bmin: Vec2, bmax: Vec2, px: f32, py: f32) -> bool {
    let minx = (amin.x + px).max(bmin.x + px);
    let maxx = (amax.x - px).min(bmax.x - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax.y - amin.y) / (amax.x - amin.x);
    let ak = amin.y - ad * amin.x;
    let bd = (bmax.y - bmin.y) / (bmax.x - bmin.x);
    let bk = bmin.y - bd * bmin.x;
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }
    let threshold = (py * 2.0).powi(2);
    dmin * dmin <= threshold || dmax * dmax <= threshold
}

#[derive(Debug, Clone)]
struct TileSlot {
    salt: u32,
    tile: Option<MeshTile>,
}

/// Holds the resident tiles of a navmesh and the links between their polygons.
///
/// At most one tile is resident per [`TileCoord`]. Adding a tile where one already lives
/// replaces it.
#[derive(Debug, Clone)]
pub struct NavmeshStore {
    params: NavmeshParams,
    encoding: RefEncoding,
    slots: Vec<TileSlot>,
    free_slots: Vec<u32>,
    lookup: HashMap<TileCoord, u32>,
}

impl NavmeshStore {
    /// Creates an empty store.
    ///
    /// Fails if the tile and polygon capacities leave fewer than
    /// [`NavmeshParams::MIN_SALT_BITS`] bits for the salt.
    pub fn new(params: NavmeshParams) -> Result<Self, NavmeshParamsError> {
        let encoding = params.encoding()?;
        Ok(Self {
            params,
            encoding,
            slots: Vec::new(),
            free_slots: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    /// The parameters the store was created with.
    #[inline]
    pub fn params(&self) -> &NavmeshParams {
        &self.params
    }

    /// The bit layout of the store's references.
    #[inline]
    pub fn encoding(&self) -> &RefEncoding {
        &self.encoding
    }

    /// Decodes `blob` and inserts it, replacing the tile at the same coordinate.
    ///
    /// Border edges are stitched to the tiles resident on all four sides.
    pub fn add_tile(&mut self, blob: TileBlob) -> Result<TileRef, TileError> {
        let data = blob.decode()?;
        if data.polygons.len() > self.params.max_polys as usize {
            return Err(TileError::TooManyPolygons {
                count: data.polygons.len(),
                max: self.params.max_polys,
            });
        }
        let coord = data.header.coord;
        if self.lookup.contains_key(&coord) {
            self.remove_tile(coord);
        }

        let index = self.allocate_slot()?;
        let tile_ref = self
            .encoding
            .tile_ref(self.slots[index as usize].salt, index);
        let tile = MeshTile::new(data, blob, tile_ref, &self.encoding);
        let polygons = tile.polygon_count();
        self.slots[index as usize].tile = Some(tile);
        self.lookup.insert(coord, index);

        for side in [0, 2, 4, 6] {
            if let Some(&neighbor) = self.lookup.get(&coord.neighbor(side)) {
                self.connect_ext_links(index, neighbor, side);
                self.connect_ext_links(neighbor, index, opposite_side(side));
            }
        }
        debug!(x = coord.x, z = coord.z, polygons, "added tile");
        Ok(tile_ref)
    }

    /// Removes the tile at `coord` and returns the blob it was inserted from.
    ///
    /// Links from neighboring tiles into it are removed and references to its polygons stop
    /// resolving.
    pub fn remove_tile(&mut self, coord: TileCoord) -> Option<TileBlob> {
        let index = self.lookup.remove(&coord)?;
        for side in [0, 2, 4, 6] {
            if let Some(&neighbor) = self.lookup.get(&coord.neighbor(side)) {
                self.unconnect_links(neighbor, index);
            }
        }
        let salt_mask = self.encoding.salt_mask();
        let slot = &mut self.slots[index as usize];
        let tile = slot.tile.take()?;
        slot.salt = (slot.salt + 1) & salt_mask;
        if slot.salt == 0 {
            slot.salt = 1;
        }
        self.free_slots.push(index);
        debug!(x = coord.x, z = coord.z, "removed tile");
        Some(tile.blob)
    }

    /// Removes every tile.
    pub fn clear(&mut self) {
        let coords: Vec<_> = self.lookup.keys().copied().collect();
        for coord in coords {
            self.remove_tile(coord);
        }
    }

    fn allocate_slot(&mut self) -> Result<u32, TileError> {
        if let Some(index) = self.free_slots.pop() {
            return Ok(index);
        }
        if self.slots.len() as u32 >= self.params.max_tiles {
            return Err(TileError::OutOfTiles(self.params.max_tiles));
        }
        self.slots.push(TileSlot {
            salt: 1,
            tile: None,
        });
        Ok(self.slots.len() as u32 - 1)
    }

    fn tile_by_index(&self, index: u32) -> Option<&MeshTile> {
        self.slots.get(index as usize)?.tile.as_ref()
    }

    /// Links the border edges of tile `index` on `side` to the polygons of tile `target`.
    fn connect_ext_links(&mut self, index: u32, target: u32, side: u8) {
        let (Some(tile), Some(target_tile)) =
            (self.tile_by_index(index), self.tile_by_index(target))
        else {
            return;
        };

        let mut new_links = Vec::new();
        for (i, polygon) in tile.data.polygons.iter().enumerate() {
            let count = polygon.vertices.len();
            for j in 0..count {
                let neighbor = polygon.neighbors[j];
                if neighbor & EXT_LINK == 0 || (neighbor & 0xff) as u8 != side {
                    continue;
                }
                let va = tile.data.vertices[polygon.vertices[j] as usize];
                let vb = tile.data.vertices[polygon.vertices[(j + 1) % count] as usize];
                for (poly, cmin, cmax) in
                    target_tile.find_connecting_polys(va, vb, opposite_side(side))
                {
                    // Compress the portal limits to a byte value.
                    let (from, to) = if side == 0 || side == 4 {
                        (va.z, vb.z)
                    } else {
                        (va.x, vb.x)
                    };
                    let mut tmin = (cmin - from) / (to - from);
                    let mut tmax = (cmax - from) / (to - from);
                    if tmin > tmax {
                        std::mem::swap(&mut tmin, &mut tmax);
                    }
                    new_links.push((
                        i,
                        Link {
                            target: self.encoding.with_poly(target_tile.tile_ref, poly as u32),
                            edge: j as u8,
                            side,
                            bmin: (tmin.clamp(0.0, 1.0) * 255.0).round() as u8,
                            bmax: (tmax.clamp(0.0, 1.0) * 255.0).round() as u8,
                        },
                    ));
                }
            }
        }

        if let Some(tile) = self
            .slots
            .get_mut(index as usize)
            .and_then(|slot| slot.tile.as_mut())
        {
            for (poly, link) in new_links {
                tile.links[poly].push(link);
            }
        }
    }

    /// Removes the links of tile `index` that point into tile `target`.
    fn unconnect_links(&mut self, index: u32, target: u32) {
        let encoding = self.encoding;
        if let Some(tile) = self
            .slots
            .get_mut(index as usize)
            .and_then(|slot| slot.tile.as_mut())
        {
            for links in &mut tile.links {
                links.retain(|link| encoding.decode(link.target).1 != target);
            }
        }
    }

    /// The tile resident at `coord`.
    pub fn tile_at(&self, coord: TileCoord) -> Option<&MeshTile> {
        self.tile_by_index(*self.lookup.get(&coord)?)
    }

    /// Iterates over all resident tiles in no particular order.
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.slots.iter().filter_map(|slot| slot.tile.as_ref())
    }

    /// Number of resident tiles.
    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    /// Total number of polygons over all resident tiles.
    pub fn polygon_count(&self) -> usize {
        self.tiles().map(MeshTile::polygon_count).sum()
    }

    /// Iterates over the resident tiles whose grid cell overlaps `bounds` on the xz-plane.
    pub fn tiles_overlapping(&self, bounds: &Aabb3d) -> impl Iterator<Item = &MeshTile> {
        let min = self.params.tile_coord_at(bounds.min);
        let max = self.params.tile_coord_at(bounds.max);
        (min.z..=max.z)
            .flat_map(move |z| (min.x..=max.x).map(move |x| TileCoord::new(x, z)))
            .filter_map(|coord| self.tile_at(coord))
    }

    /// Resolves a polygon reference to its tile and polygon index.
    pub fn tile_and_poly(&self, poly_ref: PolyRef) -> Option<(&MeshTile, usize)> {
        let (salt, index, poly) = self.encoding.decode(poly_ref);
        let slot = self.slots.get(index as usize)?;
        if slot.salt != salt {
            return None;
        }
        let tile = slot.tile.as_ref()?;
        ((poly as usize) < tile.polygon_count()).then_some((tile, poly as usize))
    }

    /// Returns `true` if `poly_ref` points at a polygon of a resident tile.
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef) -> bool {
        self.tile_and_poly(poly_ref).is_some()
    }

    /// The reference of polygon `poly` of `tile`.
    #[inline]
    pub fn poly_ref(&self, tile: &MeshTile, poly: usize) -> PolyRef {
        self.encoding.with_poly(tile.tile_ref, poly as u32)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;
    use navweave::Aabb3d;

    use super::*;
    use crate::tile_data::{DetailSubMesh, TileHeader};

    /// A square tile with a single quad covering its whole footprint.
    fn quad_tile(coord: TileCoord, size: f32, height: f32) -> TileData {
        let min = Vec3A::new(coord.x as f32 * size, height, coord.z as f32 * size);
        let vertices = vec![
            min,
            min + Vec3A::new(0.0, 0.0, size),
            min + Vec3A::new(size, 0.0, size),
            min + Vec3A::new(size, 0.0, 0.0),
        ];
        TileData {
            header: TileHeader {
                magic: TileHeader::MAGIC,
                version: TileHeader::VERSION,
                coord,
                bounds: Aabb3d {
                    min,
                    max: min + Vec3A::new(size, 0.0, size),
                },
                walkable_height: 2.0,
                walkable_radius: 0.5,
                walkable_climb: 0.5,
            },
            vertices,
            polygons: vec![TilePolygon {
                vertices: vec![0, 1, 2, 3],
                neighbors: vec![EXT_LINK | 4, EXT_LINK | 2, EXT_LINK, EXT_LINK | 6],
                flags: 1,
                area: 63,
            }],
            detail_meshes: vec![DetailSubMesh {
                vertex_base: 0,
                vertex_count: 0,
                triangle_base: 0,
                triangle_count: 0,
            }],
            detail_vertices: Vec::new(),
            detail_triangles: Vec::new(),
        }
    }

    fn store() -> NavmeshStore {
        NavmeshStore::new(NavmeshParams::for_tile_grid(Vec3A::ZERO, 10.0, 4, 4)).unwrap()
    }

    #[test]
    fn neighboring_tiles_are_stitched() {
        let mut store = store();
        let a = store
            .add_tile(quad_tile(TileCoord::new(0, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();
        let b = store
            .add_tile(quad_tile(TileCoord::new(1, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();

        let left = store.tile_at(TileCoord::new(0, 0)).unwrap();
        let links = left.links(0);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, PolyRef(b.0));
        assert_eq!(links[0].side, 0);
        assert_eq!(links[0].edge, 2);
        assert!(!links[0].is_partial());

        let right = store.tile_at(TileCoord::new(1, 0)).unwrap();
        assert_eq!(right.links(0)[0].target, PolyRef(a.0));
        assert_eq!(right.links(0)[0].side, 4);
    }

    #[test]
    fn tiles_too_far_apart_vertically_stay_separate() {
        let mut store = store();
        store
            .add_tile(quad_tile(TileCoord::new(0, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();
        store
            .add_tile(quad_tile(TileCoord::new(0, 1), 10.0, 3.0).to_blob().unwrap())
            .unwrap();
        assert!(store.tile_at(TileCoord::new(0, 0)).unwrap().links(0).is_empty());
    }

    #[test]
    fn removing_a_tile_invalidates_refs_and_unlinks_neighbors() {
        let mut store = store();
        store
            .add_tile(quad_tile(TileCoord::new(0, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();
        let b = store
            .add_tile(quad_tile(TileCoord::new(1, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();
        let poly = PolyRef(b.0);
        assert!(store.is_valid_poly_ref(poly));

        let blob = store.remove_tile(TileCoord::new(1, 0)).unwrap();
        assert!(!store.is_valid_poly_ref(poly));
        assert!(store.tile_at(TileCoord::new(0, 0)).unwrap().links(0).is_empty());
        assert!(store.remove_tile(TileCoord::new(1, 0)).is_none());

        // The slot is reused with a new salt.
        let again = store.add_tile(blob).unwrap();
        assert_ne!(again, b);
        assert_eq!(store.encoding().decode(PolyRef(again.0)).1, 1);
    }

    #[test]
    fn adding_at_an_occupied_coordinate_replaces() {
        let mut store = store();
        let blob = quad_tile(TileCoord::new(2, 2), 10.0, 0.0).to_blob().unwrap();
        store.add_tile(blob.clone()).unwrap();
        store.add_tile(blob).unwrap();
        assert_eq!(store.tile_count(), 1);
        assert_eq!(store.polygon_count(), 1);
    }

    #[test]
    fn store_capacity_is_enforced() {
        let mut store =
            NavmeshStore::new(NavmeshParams::for_tile_grid(Vec3A::ZERO, 10.0, 1, 1)).unwrap();
        store
            .add_tile(quad_tile(TileCoord::new(0, 0), 10.0, 0.0).to_blob().unwrap())
            .unwrap();
        let result =
            store.add_tile(quad_tile(TileCoord::new(1, 0), 10.0, 0.0).to_blob().unwrap());
        assert!(matches!(result, Err(TileError::OutOfTiles(1))));
    }

    #[test]
    fn garbage_blobs_are_rejected() {
        let mut store = store();
        let result = store.add_tile(TileBlob::from_bytes(vec![1, 2, 3]));
        assert!(result.is_err());
        assert_eq!(store.tile_count(), 0);
    }

    #[test]
    fn slabs_touching_at_end_points_do_not_overlap() {
        let a = (Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0));
        let b = (Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0));
        assert!(!overlap_slabs(a.0, a.1, b.0, b.1, 0.01, 0.5));
        let c = (Vec2::new(0.5, 0.2), Vec2::new(2.0, 0.2));
        assert!(overlap_slabs(a.0, a.1, c.0, c.1, 0.01, 0.5));
    }
}
