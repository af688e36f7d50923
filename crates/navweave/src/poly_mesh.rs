//! Convex polygon mesh built from a [`ContourSet`].

use std::collections::{HashMap, VecDeque};

use glam::{IVec2, U16Vec3};
use thiserror::Error;
use tracing::warn;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::{ContourSet, RegionVertexId},
    math::{
        grid2d::{intersect, intersect_prop, left, left_on},
        next, prev,
    },
};

/// Marks unused polygon vertex slots and polygon edges without a neighbor.
pub const RC_MESH_NULL_IDX: u16 = u16::MAX;

/// Polygon edge tag for edges on the tile border. The low bits hold the side:
/// 0 is -x, 1 is +z, 2 is +x, 3 is -z.
pub(crate) const PORTAL_FLAG: u16 = 0x8000;

/// Region id given to polygons that span several regions after vertex removal.
const MULTIPLE_REGIONS: RegionId = RegionId::NONE;

/// Set on a triangulation index when the vertex after it forms a valid ear.
const EAR_FLAG: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
///
/// Vertices are in cell coordinates relative to [`PolygonNavmesh::aabb`]`.min`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonNavmesh {
    /// The mesh vertices.
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: polygon count * 2 * [`Self::max_vertices_per_polygon`]]
    ///
    /// Each polygon stores its vertex indices followed by one neighbor entry per edge.
    /// Unused slots hold [`RC_MESH_NULL_IDX`]. Border edges have the high bit set.
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user flags assigned to each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonNavmesh {
    /// Number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.areas.len()
    }

    /// The vertex indices of polygon `i`, without unused slots.
    pub fn polygon_vertices(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let vertices = &self.polygons[i * nvp * 2..i * nvp * 2 + nvp];
        let count = count_poly_verts(vertices);
        &vertices[..count]
    }

    /// The neighbor entry of each edge of polygon `i`.
    pub fn polygon_neighbors(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let count = self.polygon_vertices(i).len();
        &self.polygons[i * nvp * 2 + nvp..i * nvp * 2 + nvp + count]
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the contours.
    ///
    /// Each contour is triangulated, the triangles are greedily merged into convex polygons of at
    /// most `max_vertices_per_polygon` vertices, and vertices marked as tile border vertices are
    /// removed where possible.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: u16,
    ) -> Result<PolygonNavmesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon as usize;
        if nvp < 3 {
            return Err(PolygonMeshError::TooFewVerticesPerPolygon(max_vertices_per_polygon));
        }

        let mut max_vertices = 0;
        let mut max_triangles = 0;
        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }
            max_vertices += contour.vertices.len();
            max_triangles += contour.vertices.len() - 2;
        }
        if max_vertices >= 0xfffe {
            return Err(PolygonMeshError::TooManyVertices(max_vertices));
        }

        let mut mesh = MeshBuilder {
            vertices: Vec::with_capacity(max_vertices),
            buckets: HashMap::new(),
            polygons: Vec::new(),
            nvp,
            max_polygons: max_triangles,
        };
        let mut remove_flags = vec![false; max_vertices];

        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }

            let positions: Vec<IVec2> = contour
                .vertices
                .iter()
                .map(|v| IVec2::new(v.position.x, v.position.z))
                .collect();
            let mut indices: Vec<u32> = (0..positions.len() as u32).collect();
            let mut triangles = Vec::with_capacity(positions.len());
            if !triangulate(&positions, &mut indices, &mut triangles) {
                warn!(region = contour.region.bits(), "bad contour triangulation");
            }

            // Add and merge vertices.
            let welded: Vec<u16> = contour
                .vertices
                .iter()
                .map(|vertex| {
                    let index = mesh.add_vertex(vertex.position.x as u16, vertex.position.y as u16, vertex.position.z as u16);
                    if vertex.flags.contains(RegionVertexId::BORDER_VERTEX) {
                        remove_flags[index as usize] = true;
                    }
                    index
                })
                .collect();

            let mut polys: Vec<Vec<u16>> = triangles
                .iter()
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| vec![welded[t[0] as usize], welded[t[1] as usize], welded[t[2] as usize]])
                .collect();
            if polys.is_empty() {
                continue;
            }
            merge_polygons(&mut polys, &mesh.vertices, nvp, None);

            for poly in polys {
                mesh.polygons.push(MeshPolygon {
                    vertices: poly,
                    region: contour.region,
                    area: contour.area,
                });
                if mesh.polygons.len() > mesh.max_polygons {
                    return Err(PolygonMeshError::TooManyPolygons(mesh.polygons.len()));
                }
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if remove_flags[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16)?;
                remove_flags.remove(i);
                continue;
            }
            i += 1;
        }

        if mesh.vertices.len() > 0xffff {
            return Err(PolygonMeshError::TooManyVertices(mesh.vertices.len()));
        }
        if mesh.polygons.len() > 0xffff {
            return Err(PolygonMeshError::TooManyPolygons(mesh.polygons.len()));
        }

        // Flatten into the strided layout.
        let polygon_count = mesh.polygons.len();
        let mut polygons = vec![RC_MESH_NULL_IDX; polygon_count * nvp * 2];
        let mut regions = Vec::with_capacity(polygon_count);
        let mut areas = Vec::with_capacity(polygon_count);
        for (i, polygon) in mesh.polygons.iter().enumerate() {
            polygons[i * nvp * 2..i * nvp * 2 + polygon.vertices.len()].copy_from_slice(&polygon.vertices);
            regions.push(polygon.region);
            areas.push(polygon.area);
        }
        build_mesh_adjacency(&mut polygons, polygon_count, mesh.vertices.len(), nvp);

        let mut navmesh = PolygonNavmesh {
            vertices: mesh.vertices,
            polygons,
            regions,
            flags: vec![0; polygon_count],
            areas,
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        };
        if self.border_size > 0 {
            navmesh.tag_portal_edges(self.width, self.height);
        }
        Ok(navmesh)
    }
}

impl PolygonNavmesh {
    /// Tags open edges that lie on the tile border with the side they face.
    fn tag_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.max_vertices_per_polygon;
        for i in 0..self.polygon_count() {
            let base = i * nvp * 2;
            let count = count_poly_verts(&self.polygons[base..base + nvp]);
            for j in 0..count {
                if self.polygons[base + nvp + j] != RC_MESH_NULL_IDX {
                    continue;
                }
                let nj = if j + 1 >= count { 0 } else { j + 1 };
                let va = self.vertices[self.polygons[base + j] as usize];
                let vb = self.vertices[self.polygons[base + nj] as usize];
                let side = if va.x == 0 && vb.x == 0 {
                    Some(0)
                } else if va.z == height && vb.z == height {
                    Some(1)
                } else if va.x == width && vb.x == width {
                    Some(2)
                } else if va.z == 0 && vb.z == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polygons[base + nvp + j] = PORTAL_FLAG | side;
                }
            }
        }
    }
}

struct MeshPolygon {
    vertices: Vec<u16>,
    region: RegionId,
    area: AreaType,
}

struct MeshBuilder {
    vertices: Vec<U16Vec3>,
    /// Vertex indices by xz position, for welding.
    buckets: HashMap<(u16, u16), Vec<u16>>,
    polygons: Vec<MeshPolygon>,
    nvp: usize,
    max_polygons: usize,
}

impl MeshBuilder {
    /// Returns the index of an existing vertex at the same xz position within 2 height units,
    /// or adds a new one.
    fn add_vertex(&mut self, x: u16, y: u16, z: u16) -> u16 {
        let bucket = self.buckets.entry((x, z)).or_default();
        if let Some(&existing) = bucket
            .iter()
            .rev()
            .find(|&&i| self.vertices[i as usize].y.abs_diff(y) <= 2)
        {
            return existing;
        }
        let index = self.vertices.len() as u16;
        self.vertices.push(U16Vec3::new(x, y, z));
        bucket.push(index);
        index
    }

    fn rebuild_buckets(&mut self) {
        self.buckets.clear();
        for (i, v) in self.vertices.iter().enumerate() {
            self.buckets.entry((v.x, v.z)).or_default().push(i as u16);
        }
    }

    fn can_remove_vertex(&self, rem: u16) -> bool {
        // Count the edges that would remain around the hole.
        let mut touched_vertices = 0;
        let mut remaining_edges = 0;
        for polygon in &self.polygons {
            let removed = polygon.vertices.iter().filter(|&&v| v == rem).count();
            touched_vertices += removed;
            if removed > 0 {
                remaining_edges += polygon.vertices.len() - (removed + 1);
            }
        }
        // Too few edges to form a polygon, e.g. the tip of a lone triangle.
        if remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex: (other vertex, share count).
        let mut edges: Vec<(u16, u32)> = Vec::with_capacity(touched_vertices * 2);
        for polygon in &self.polygons {
            let nv = polygon.vertices.len();
            let mut k = nv - 1;
            for j in 0..nv {
                let (a, b) = (polygon.vertices[j], polygon.vertices[k]);
                k = j;
                if a != rem && b != rem {
                    continue;
                }
                let other = if b == rem { a } else { b };
                match edges.iter_mut().find(|(vertex, _)| *vertex == other) {
                    Some((_, count)) => *count += 1,
                    None => edges.push((other, 1)),
                }
            }
        }

        // More than two open edges means non-adjacent polygons share the vertex.
        let open_edges = edges.iter().filter(|(_, count)| *count < 2).count();
        open_edges <= 2
    }

    fn remove_vertex(&mut self, rem: u16) -> Result<(), PolygonMeshError> {
        // Collect the edges of every touching polygon that do not include the removed vertex.
        let mut edges: Vec<HoleEdge> = Vec::new();
        let mut i = 0;
        while i < self.polygons.len() {
            if !self.polygons[i].vertices.contains(&rem) {
                i += 1;
                continue;
            }
            let polygon = self.polygons.swap_remove(i);
            let nv = polygon.vertices.len();
            let mut k = nv - 1;
            for j in 0..nv {
                if polygon.vertices[j] != rem && polygon.vertices[k] != rem {
                    edges.push(HoleEdge {
                        from: polygon.vertices[k],
                        to: polygon.vertices[j],
                        region: polygon.region,
                        area: polygon.area,
                    });
                }
                k = j;
            }
        }

        // Remove the vertex and shift indices down.
        self.vertices.remove(rem as usize);
        let shift = |v: &mut u16| {
            if *v > rem {
                *v -= 1;
            }
        };
        for polygon in &mut self.polygons {
            polygon.vertices.iter_mut().for_each(shift);
        }
        for edge in &mut edges {
            shift(&mut edge.from);
            shift(&mut edge.to);
        }
        self.rebuild_buckets();

        if edges.is_empty() {
            return Ok(());
        }

        // Chain the edges into the hole boundary, growing at both ends.
        let first = edges.swap_remove(0);
        let mut hole = VecDeque::from([first.from, first.to]);
        let mut hole_regions = VecDeque::from([first.region, first.region]);
        let mut hole_areas = VecDeque::from([first.area, first.area]);
        while !edges.is_empty() {
            let mut matched = false;
            let mut e = 0;
            while e < edges.len() {
                let edge = edges[e];
                let added = if hole.front() == Some(&edge.to) {
                    hole.push_front(edge.from);
                    hole_regions.push_front(edge.region);
                    hole_areas.push_front(edge.area);
                    true
                } else if hole.back() == Some(&edge.from) {
                    hole.push_back(edge.to);
                    hole_regions.push_back(edge.region);
                    hole_areas.push_back(edge.area);
                    true
                } else {
                    false
                };
                if added {
                    edges.swap_remove(e);
                    matched = true;
                } else {
                    e += 1;
                }
            }
            if !matched {
                break;
            }
        }
        // The boundary is closed, drop the duplicated start vertex.
        if hole.len() > 1 && hole.front() == hole.back() {
            hole.pop_back();
            hole_regions.pop_back();
            hole_areas.pop_back();
        }

        let hole: Vec<u16> = hole.into();
        let hole_regions: Vec<RegionId> = hole_regions.into();
        let hole_areas: Vec<AreaType> = hole_areas.into();

        let positions: Vec<IVec2> = hole
            .iter()
            .map(|&v| {
                let v = self.vertices[v as usize];
                IVec2::new(v.x as i32, v.z as i32)
            })
            .collect();
        let mut indices: Vec<u32> = (0..hole.len() as u32).collect();
        let mut triangles = Vec::with_capacity(hole.len());
        if !triangulate(&positions, &mut indices, &mut triangles) {
            warn!("bad triangulation while removing a border vertex");
        }

        let mut polys = Vec::with_capacity(triangles.len());
        let mut poly_regions = Vec::with_capacity(triangles.len());
        let mut poly_areas = Vec::with_capacity(triangles.len());
        for t in &triangles {
            let [a, b, c] = t.map(|i| i as usize);
            if a == b || a == c || b == c {
                continue;
            }
            polys.push(vec![hole[a], hole[b], hole[c]]);
            // A polygon covering several regions is marked as such.
            poly_regions.push(
                if hole_regions[a] != hole_regions[b] || hole_regions[b] != hole_regions[c] {
                    MULTIPLE_REGIONS
                } else {
                    hole_regions[a]
                },
            );
            poly_areas.push(hole_areas[a]);
        }
        if polys.is_empty() {
            return Ok(());
        }

        merge_polygons(
            &mut polys,
            &self.vertices,
            self.nvp,
            Some((&mut poly_regions, &mut poly_areas)),
        );

        for ((vertices, region), area) in polys.into_iter().zip(poly_regions).zip(poly_areas) {
            if self.polygons.len() >= self.max_polygons {
                break;
            }
            self.polygons.push(MeshPolygon {
                vertices,
                region,
                area,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct HoleEdge {
    from: u16,
    to: u16,
    region: RegionId,
    area: AreaType,
}

fn count_poly_verts(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|&v| v == RC_MESH_NULL_IDX)
        .unwrap_or(polygon.len())
}

/// Greedily merges polygon pairs sharing their longest common edge while the result stays
/// convex and within `nvp` vertices. When `attributes` are given, they follow the polygons.
fn merge_polygons(
    polys: &mut Vec<Vec<u16>>,
    vertices: &[U16Vec3],
    nvp: usize,
    mut attributes: Option<(&mut Vec<RegionId>, &mut Vec<AreaType>)>,
) {
    if nvp <= 3 {
        return;
    }
    loop {
        let mut best: Option<(i64, usize, usize, usize, usize)> = None;
        for j in 0..polys.len().saturating_sub(1) {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], vertices, nvp)
                    && best.is_none_or(|(best_value, ..)| value > best_value)
                {
                    best = Some((value, j, k, ea, eb));
                }
            }
        }
        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        let merged = merge_poly_verts(&polys[pa], &polys[pb], ea, eb);
        polys[pa] = merged;
        polys.swap_remove(pb);
        if let Some((regions, areas)) = attributes.as_mut() {
            if regions[pa] != regions[pb] {
                regions[pa] = MULTIPLE_REGIONS;
            }
            regions.swap_remove(pb);
            areas.swap_remove(pb);
        }
    }
}

/// Returns the squared length of the shared edge if `pa` and `pb` can be merged into a convex
/// polygon, along with the shared edge's index in each polygon.
fn poly_merge_value(pa: &[u16], pb: &[u16], vertices: &[U16Vec3], nvp: usize) -> Option<(i64, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let ordered = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let mut shared = None;
    'outer: for i in 0..na {
        let edge_a = ordered(pa[i], pa[(i + 1) % na]);
        for j in 0..nb {
            if edge_a == ordered(pb[j], pb[(j + 1) % nb]) {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let xz = |i: u16| {
        let v = vertices[i as usize];
        IVec2::new(v.x as i32, v.z as i32)
    };
    // The merged polygon must stay convex at both ends of the shared edge.
    if !left(xz(pa[(ea + na - 1) % na]), xz(pa[ea]), xz(pb[(eb + 2) % nb])) {
        return None;
    }
    if !left(xz(pb[(eb + nb - 1) % nb]), xz(pb[eb]), xz(pa[(ea + 2) % na])) {
        return None;
    }

    let d = xz(pa[ea]) - xz(pa[(ea + 1) % na]);
    Some((d.x as i64 * d.x as i64 + d.y as i64 * d.y as i64, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged
}

/// Fills the neighbor half of every polygon with the index of the polygon sharing each edge.
fn build_mesh_adjacency(polygons: &mut [u16], polygon_count: usize, vertex_count: usize, nvp: usize) {
    struct Edge {
        vertices: [u16; 2],
        polys: [usize; 2],
        poly_edges: [usize; 2],
    }
    let mut edges: Vec<Edge> = Vec::with_capacity(polygon_count * nvp);
    let mut edges_by_vertex: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];

    let edge_vertices = |polygons: &[u16], i: usize, j: usize| {
        let p = &polygons[i * nvp * 2..i * nvp * 2 + nvp];
        let v0 = p[j];
        let v1 = if j + 1 >= nvp || p[j + 1] == RC_MESH_NULL_IDX {
            p[0]
        } else {
            p[j + 1]
        };
        (v0, v1)
    };

    for i in 0..polygon_count {
        for j in 0..nvp {
            if polygons[i * nvp * 2 + j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_vertices(polygons, i, j);
            if v0 < v1 {
                edges_by_vertex[v0 as usize].push(edges.len());
                edges.push(Edge {
                    vertices: [v0, v1],
                    polys: [i, i],
                    poly_edges: [j, 0],
                });
            }
        }
    }

    for i in 0..polygon_count {
        for j in 0..nvp {
            if polygons[i * nvp * 2 + j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_vertices(polygons, i, j);
            if v0 > v1 {
                let candidates = &edges_by_vertex[v1 as usize];
                if let Some(&e) = candidates
                    .iter()
                    .rev()
                    .find(|&&e| edges[e].vertices[1] == v0 && edges[e].polys[0] == edges[e].polys[1])
                {
                    edges[e].polys[1] = i;
                    edges[e].poly_edges[1] = j;
                }
            }
        }
    }

    for edge in &edges {
        if edge.polys[0] != edge.polys[1] {
            polygons[edge.polys[0] * nvp * 2 + nvp + edge.poly_edges[0]] = edge.polys[1] as u16;
            polygons[edge.polys[1] * nvp * 2 + nvp + edge.poly_edges[1]] = edge.polys[0] as u16;
        }
    }
}

/// Ear-clipping triangulation of a simple polygon given as `indices` into `vertices`.
///
/// Appends triangles (as indices into `vertices`) to `triangles`. Returns `false` if the
/// polygon could not be fully triangulated, in which case the triangles found so far are kept.
pub(crate) fn triangulate(vertices: &[IVec2], indices: &mut Vec<u32>, triangles: &mut Vec<[u32; 3]>) -> bool {
    let vertex = |indices: &[u32], i: usize| vertices[(indices[i] & INDEX_MASK) as usize];

    // The top bit of an index marks that the vertex after it can be clipped.
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, vertices, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let mut min_len = None;
        let mut min_index = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let d = vertex(indices, next(i1, n)) - vertex(indices, i);
                let len = d.x as i64 * d.x as i64 + d.y as i64 * d.y as i64;
                if min_len.is_none_or(|min| len < min) {
                    min_len = Some(len);
                    min_index = Some(i);
                }
            }
        }

        if min_index.is_none() {
            // Overlapping segments: retry with a looser cone test.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, vertices, indices) {
                    let d = vertex(indices, next(i2, n)) - vertex(indices, i);
                    let len = d.x as i64 * d.x as i64 + d.y as i64 * d.y as i64;
                    if min_len.is_none_or(|min| len < min) {
                        min_len = Some(len);
                        min_index = Some(i);
                    }
                }
            }
        }
        let Some(i) = min_index else {
            // The contour is messed up, usually from overly aggressive simplification.
            return false;
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([
            indices[i] & INDEX_MASK,
            indices[i1] & INDEX_MASK,
            indices[i2] & INDEX_MASK,
        ]);

        // Clip the ear.
        indices.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        if diagonal(prev(i, n), i1, vertices, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), vertices, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    if indices.len() == 3 {
        triangles.push([
            indices[0] & INDEX_MASK,
            indices[1] & INDEX_MASK,
            indices[2] & INDEX_MASK,
        ]);
    }
    true
}

#[inline]
fn at(vertices: &[IVec2], indices: &[u32], i: usize) -> IVec2 {
    vertices[(indices[i] & INDEX_MASK) as usize]
}

/// True iff the diagonal `(i, j)` is strictly internal to the polygon in the neighborhood of `i`.
fn in_cone(i: usize, j: usize, vertices: &[IVec2], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let pi = at(vertices, indices, i);
    let pj = at(vertices, indices, j);
    let pi1 = at(vertices, indices, next(i, n));
    let pin1 = at(vertices, indices, prev(i, n));

    // Convex vertex: i+1 is left of or on (i-1, i).
    if left_on(pin1, pi, pi1) {
        return if loose {
            left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
        } else {
            left(pi, pj, pin1) && left(pj, pi, pi1)
        };
    }
    // Reflex vertex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// True iff `(i, j)` is a proper diagonal that crosses no polygon edge.
fn diagonalie(i: usize, j: usize, vertices: &[IVec2], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let d0 = at(vertices, indices, i);
    let d1 = at(vertices, indices, j);
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j.
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = at(vertices, indices, k);
        let p1 = at(vertices, indices, k1);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        let crosses = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if crosses {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    in_cone(i, j, vertices, indices, false) && diagonalie(i, j, vertices, indices, false)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    in_cone(i, j, vertices, indices, true) && diagonalie(i, j, vertices, indices, true)
}

/// Errors that can occur when building a [`PolygonNavmesh`].
#[derive(Error, Debug)]
pub enum PolygonMeshError {
    /// Polygons need at least three vertices.
    #[error("max vertices per polygon must be at least 3, got {0}")]
    TooFewVerticesPerPolygon(u16),
    /// The mesh has more vertices than a 16-bit index can address.
    #[error("too many vertices: {0}")]
    TooManyVertices(usize),
    /// The mesh has more polygons than expected.
    #[error("too many polygons: {0}")]
    TooManyPolygons(usize),
}

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use crate::contours::{Contour, ContourVertex};

    use super::*;

    fn contour_set(contours: Vec<Vec<(i32, i32, u32)>>, border_size: u16) -> ContourSet {
        ContourSet {
            contours: contours
                .into_iter()
                .enumerate()
                .map(|(i, vertices)| Contour {
                    vertices: vertices
                        .into_iter()
                        .map(|(x, z, flags)| ContourVertex {
                            position: IVec3::new(x, 0, z),
                            flags: RegionVertexId::from_bits_retain(flags),
                        })
                        .collect(),
                    raw_vertices: Vec::new(),
                    region: RegionId::from(i as u16 + 1),
                    area: AreaType::DEFAULT_WALKABLE,
                })
                .collect(),
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 10,
            height: 10,
            border_size,
            max_error: 1.3,
        }
    }

    /// Contour order as produced by the contour walk: counter-clockwise in x/z.
    fn square(min: i32, max: i32) -> Vec<(i32, i32, u32)> {
        vec![(min, min, 0), (min, max, 0), (max, max, 0), (max, min, 0)]
    }

    #[test]
    fn square_merges_into_one_quad() {
        let mesh = contour_set(vec![square(0, 4)], 0).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0).len(), 4);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.polygon_neighbors(0).iter().all(|&n| n == RC_MESH_NULL_IDX));
    }

    #[test]
    fn triangles_only_stay_triangles() {
        let mesh = contour_set(vec![square(0, 4)], 0).into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        // The two triangles share the diagonal.
        let neighbors: Vec<u16> = mesh
            .polygon_neighbors(0)
            .iter()
            .copied()
            .filter(|&n| n != RC_MESH_NULL_IDX)
            .collect();
        assert_eq!(neighbors, vec![1]);
    }

    #[test]
    fn adjacent_contours_share_welded_vertices() {
        let left_square = square(0, 4);
        let right_square = square(4, 8)
            .into_iter()
            .map(|(x, z, f)| (x, z - 4, f))
            .collect();
        let mesh = contour_set(vec![left_square, right_square], 0)
            .into_polygon_mesh(6)
            .unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.polygon_neighbors(0).iter().filter(|&&n| n == 1).count(), 1);
    }

    #[test]
    fn border_edges_are_tagged_as_portals() {
        let mesh = contour_set(vec![square(0, 10)], 2).into_polygon_mesh(6).unwrap();
        let mut sides: Vec<u16> = mesh
            .polygon_neighbors(0)
            .iter()
            .map(|&n| {
                assert!(n & PORTAL_FLAG != 0);
                n & 0x3
            })
            .collect();
        sides.sort();
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ear_clipping_handles_concave_polygons() {
        // An L shape.
        let vertices = vec![
            IVec2::new(0, 0),
            IVec2::new(0, 4),
            IVec2::new(2, 4),
            IVec2::new(2, 2),
            IVec2::new(4, 2),
            IVec2::new(4, 0),
        ];
        let mut indices: Vec<u32> = (0..6).collect();
        let mut triangles = Vec::new();
        assert!(triangulate(&vertices, &mut indices, &mut triangles));
        assert_eq!(triangles.len(), 4);
    }
}
