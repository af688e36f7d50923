//! Region outlines traced from a [`CompactHeightfield`] and simplified into polygons.

use glam::{IVec2, IVec3};
use tracing::warn;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        grid2d::{intersect, left, left_on},
        next, prev,
    },
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines of the heightfield.
    ///
    /// The raw contours match the region outlines exactly. `max_error` and `max_edge_len`
    /// control how closely the simplified contours follow the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero disables the edge length feature.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let border_size = self.border_size;
        let mut cset = ContourSet {
            contours: Vec::with_capacity((self.max_region.bits() as usize).max(8)),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // The contours are expressed relative to the tile without its border.
            let pad = border_size as f32 * self.cell_size;
            cset.aabb.min.x += pad;
            cset.aabb.min.z += pad;
            cset.aabb.max.x -= pad;
            cset.aabb.max.z -= pad;
        }

        // Mark boundaries: one bit per direction whose neighbor is in a different region.
        let mut flags = vec![0_u8; self.spans.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if !region.is_interior() {
                        continue;
                    }
                    let mut connected = 0_u8;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor_index(x, z, i, dir)
                            .map(|ai| self.spans[ai].region)
                            .unwrap_or(RegionId::NONE);
                        if neighbor_region == region {
                            connected |= 1 << dir;
                        }
                    }
                    flags[i] = connected ^ 0xf;
                }
            }
        }

        let mut raw = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if !region.is_interior() {
                        continue;
                    }
                    let area = self.areas[i];

                    raw.clear();
                    simplified.clear();
                    self.walk_contour(x, z, i, &mut flags, &mut raw);
                    simplify_contour(&raw, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        continue;
                    }
                    let offset = IVec3::new(border_size as i32, 0, border_size as i32);
                    cset.contours.push(Contour {
                        vertices: simplified
                            .iter()
                            .map(|vertex: &ContourVertex| ContourVertex {
                                position: vertex.position - offset,
                                flags: vertex.flags,
                            })
                            .collect(),
                        raw_vertices: raw
                            .iter()
                            .map(|vertex: &ContourVertex| ContourVertex {
                                position: vertex.position - offset,
                                flags: vertex.flags,
                            })
                            .collect(),
                        region,
                        area,
                    });
                }
            }
        }

        cset.merge_holes(self.max_region);
        cset
    }

    /// Traces the outline of the region containing span `i`, clearing the visited edge flags.
    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge.
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_index = i;
        let area = self.areas[i];

        for _ in 1..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner.
                let (y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let mut px = x as i32;
                let mut pz = z as i32;
                match dir {
                    0 => pz += 1,
                    1 => {
                        px += 1;
                        pz += 1;
                    }
                    2 => px += 1,
                    _ => {}
                }
                let mut vertex_flags = RegionVertexId::NONE;
                if let Some(ai) = self.neighbor_index(x, z, i, dir) {
                    vertex_flags = RegionVertexId::from(self.spans[ai].region);
                    if area != self.areas[ai] {
                        vertex_flags |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    vertex_flags |= RegionVertexId::BORDER_VERTEX;
                }
                points.push(ContourVertex {
                    position: IVec3::new(px, y as i32, pz),
                    flags: vertex_flags,
                });

                // Remove visited edges.
                flags[i] &= !(1 << dir);
                // Rotate clockwise.
                dir = (dir + 1) & 0x3;
            } else {
                let Some((nx, nz, ni)) = self.neighbor(x, z, i, dir) else {
                    // Connected edges always have a neighbor.
                    return;
                };
                x = nx;
                z = nz;
                i = ni;
                // Rotate counter-clockwise.
                dir = (dir + 3) & 0x3;
            }
            if start_index == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner between `dir` and the next direction, and whether the
    /// corner is a vertex on the tile border that should be removed later.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes so border vertices between two areas are kept.
        let code = |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = code(i);

        if let Some((ax, az, ai)) = self.neighbor(x, z, i, dir) {
            height = height.max(self.spans[ai].y);
            regs[1] = code(ai);
            if let Some(bi) = self.neighbor_index(ax, az, ai, dir_p) {
                height = height.max(self.spans[bi].y);
                regs[2] = code(bi);
            }
        }
        if let Some((ax, az, ai)) = self.neighbor(x, z, i, dir_p) {
            height = height.max(self.spans[ai].y);
            regs[3] = code(ai);
            if let Some(bi) = self.neighbor_index(ax, az, ai, dir) {
                height = height.max(self.spans[bi].y);
                regs[2] = code(bi);
            }
        }

        // A border vertex has two identical exterior border cells in a row followed by two
        // interior cells of the same area, and none of the cells are out of bounds.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];
            let two_same_exteriors = (a & b & border) != 0 && a == b;
            let two_interiors = ((c | d) & border) == 0;
            let interiors_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exteriors && two_interiors && interiors_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

/// Simplified vertex paired with the raw vertex it was taken from.
#[derive(Clone, Copy)]
struct SimplifiedVertex {
    position: IVec3,
    raw_index: usize,
}

fn simplify_contour(
    points: &[ContourVertex],
    output: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }
    let region_of = |i: usize| points[i].flags & RegionVertexId::REGION_MASK;
    let mut simplified: Vec<SimplifiedVertex> = Vec::with_capacity(64);

    let has_connections = points.iter().any(|point| !(point.flags & RegionVertexId::REGION_MASK).is_empty());
    if has_connections {
        // Add a point at every location where the region or area changes.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regions = region_of(i) != region_of(ii);
            let area_borders = points[i].flags.contains(RegionVertexId::AREA_BORDER)
                != points[ii].flags.contains(RegionVertexId::AREA_BORDER);
            if different_regions || area_borders {
                simplified.push(SimplifiedVertex {
                    position: points[i].position,
                    raw_index: i,
                });
            }
        }
    }

    if simplified.is_empty() {
        // No connections at all: seed with the lower-left and upper-right vertices.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, point) in points.iter().enumerate() {
            let p = point.position;
            let ll = points[lower_left].position;
            let ur = points[upper_right].position;
            if p.x < ll.x || (p.x == ll.x && p.z < ll.z) {
                lower_left = i;
            }
            if p.x > ur.x || (p.x == ur.x && p.z > ur.z) {
                upper_right = i;
            }
        }
        simplified.push(SimplifiedVertex {
            position: points[lower_left].position,
            raw_index: lower_left,
        });
        simplified.push(SimplifiedVertex {
            position: points[upper_right].position,
            raw_index: upper_right,
        });
    }

    // Add points until all raw points are within error tolerance to the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let mut a = simplified[i].position;
        let ai = simplified[i].raw_index;
        let mut b = simplified[ii].position;
        let bi = simplified[ii].raw_index;

        // Traverse the segment in lexicographic order so that the max deviation is calculated
        // the same way when traversing opposite segments.
        let (mut ci, step, end) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut a, &mut b);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        let mut max_deviation = 0.0;
        let mut max_index = None;
        // Tessellate only outer edges or edges between areas.
        if region_of(ci).is_empty() || points[ci].flags.contains(RegionVertexId::AREA_BORDER) {
            while ci != end {
                let deviation = distance_pt_seg_sq(points[ci].position, a, b);
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_index = Some(ci);
                }
                ci = (ci + step) % pn;
            }
        }

        match max_index {
            Some(max_index) if max_deviation > max_error_sq => {
                simplified.insert(
                    i + 1,
                    SimplifiedVertex {
                        position: points[max_index].position,
                        raw_index: max_index,
                    },
                );
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sq = max_edge_len as i32 * max_edge_len as i32;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let a = simplified[i].position;
            let ai = simplified[i].raw_index;
            let b = simplified[ii].position;
            let bi = simplified[ii].raw_index;

            let ci = (ai + 1) % pn;
            let tessellate = (tessellate_walls && region_of(ci).is_empty())
                || (tessellate_areas && points[ci].flags.contains(RegionVertexId::AREA_BORDER));

            let mut max_index = None;
            if tessellate {
                let dx = b.x - a.x;
                let dz = b.z - a.z;
                if dx * dx + dz * dz > max_edge_len_sq {
                    // Round based on the segment's lexicographic order so the tessellation is
                    // identical regardless of traversal direction.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        max_index = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            match max_index {
                Some(max_index) => simplified.insert(
                    i + 1,
                    SimplifiedVertex {
                        position: points[max_index].position,
                        raw_index: max_index,
                    },
                ),
                None => i += 1,
            }
        }
    }

    // The edge vertex flag is taken from the current raw point, the neighbour region from the next.
    output.extend(simplified.iter().map(|vertex| {
        let next_raw = (vertex.raw_index + 1) % pn;
        let neighbor = points[next_raw].flags
            & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER);
        let border = points[vertex.raw_index].flags & RegionVertexId::BORDER_VERTEX;
        ContourVertex {
            position: vertex.position,
            flags: neighbor | border,
        }
    }));
}

/// Squared distance between `point` and the segment `p`-`q` on the xz-plane.
fn distance_pt_seg_sq(point: IVec3, p: IVec3, q: IVec3) -> f32 {
    let pqx = (q.x - p.x) as f32;
    let pqz = (q.z - p.z) as f32;
    let dx = (point.x - p.x) as f32;
    let dz = (point.z - p.z) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x as f32 + t * pqx - point.x as f32;
    let dz = p.z as f32 + t * pqz - point.z as f32;
    dx * dx + dz * dz
}

/// Removes adjacent vertices which are equal on the xz-plane, which would confuse the triangulator.
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if simplified.len() > 1 && xz_equal(simplified[i].position, simplified[ni].position) {
            simplified.remove(i);
        }
        i += 1;
    }
}

#[inline]
fn xz_equal(a: IVec3, b: IVec3) -> bool {
    a.x == b.x && a.z == b.z
}

#[inline]
fn xz(v: IVec3) -> IVec2 {
    IVec2::new(v.x, v.z)
}

/// Twice the signed area of the contour on the xz-plane, rounded. Negative for holes.
fn polygon_area_2d(vertices: &[ContourVertex]) -> i64 {
    let n = vertices.len();
    let mut area = 0_i64;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = vertices[i].position;
        let vj = vertices[j].position;
        area += vi.x as i64 * vj.z as i64 - vj.x as i64 * vi.z as i64;
        j = i;
    }
    (area + 1) / 2
}

/// Whether the diagonal from vertex `i` of `vertices` to `point` lies inside the polygon near `i`.
fn in_cone(i: usize, vertices: &[ContourVertex], point: IVec3) -> bool {
    let n = vertices.len();
    let pi = xz(vertices[i].position);
    let pi1 = xz(vertices[next(i, n)].position);
    let pin1 = xz(vertices[prev(i, n)].position);
    let pj = xz(point);

    // Convex vertex: i+1 is left of or on (i-1, i).
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Reflex vertex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Whether segment `d0`-`d1` crosses any edge of `vertices`, ignoring the edges incident to vertex `skip`.
fn intersect_seg_contour(d0: IVec3, d1: IVec3, skip: Option<usize>, vertices: &[ContourVertex]) -> bool {
    let n = vertices.len();
    for k in 0..n {
        let k1 = next(k, n);
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = vertices[k].position;
        let p1 = vertices[k1].position;
        if xz_equal(d0, p0) || xz_equal(d1, p0) || xz_equal(d0, p1) || xz_equal(d1, p1) {
            continue;
        }
        if intersect(xz(d0), xz(d1), xz(p0), xz(p1)) {
            return true;
        }
    }
    false
}

/// Splices `hole` into `outline` through the diagonal between `outline[ia]` and `hole[ib]`.
fn merge_contours(outline: &mut Contour, hole: &mut Contour, ia: usize, ib: usize) {
    let na = outline.vertices.len();
    let nb = hole.vertices.len();
    let mut vertices = Vec::with_capacity(na + nb + 2);
    for i in 0..=na {
        vertices.push(outline.vertices[(ia + i) % na]);
    }
    for i in 0..=nb {
        vertices.push(hole.vertices[(ib + i) % nb]);
    }
    outline.vertices = vertices;
    hole.vertices.clear();
    hole.raw_vertices.clear();
}

fn leftmost_vertex(contour: &Contour) -> (IVec3, usize) {
    let mut best = contour.vertices[0].position;
    let mut best_index = 0;
    for (i, vertex) in contour.vertices.iter().enumerate().skip(1) {
        let p = vertex.position;
        if p.x < best.x || (p.x == best.x && p.z < best.z) {
            best = p;
            best_index = i;
        }
    }
    (best, best_index)
}

impl ContourSet {
    /// Connects every hole (a contour wound backwards) to the outline of its region.
    fn merge_holes(&mut self, max_region: RegionId) {
        let winding: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| polygon_area_2d(&contour.vertices) < 0)
            .collect();
        if !winding.iter().any(|&is_hole| is_hole) {
            return;
        }

        let region_count = max_region.bits() as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.bits() as usize;
            if region >= region_count {
                continue;
            }
            if winding[i] {
                holes[region].push(i);
            } else if outlines[region].is_some() {
                warn!(region, "multiple outlines for region");
            } else {
                outlines[region] = Some(i);
            }
        }

        for (region, region_holes) in holes.into_iter().enumerate() {
            if region_holes.is_empty() {
                continue;
            }
            let Some(outline) = outlines[region] else {
                warn!(region, "missing outline for region");
                continue;
            };
            self.merge_region_holes(outline, region_holes);
        }

        self.contours.retain(|contour| contour.vertices.len() >= 3);
    }

    fn merge_region_holes(&mut self, outline: usize, holes: Vec<usize>) {
        // Sort holes from left to right.
        let mut holes: Vec<(IVec3, usize, usize)> = holes
            .into_iter()
            .map(|hole| {
                let (min, leftmost) = leftmost_vertex(&self.contours[hole]);
                (min, leftmost, hole)
            })
            .collect();
        holes.sort_by(|a, b| a.0.x.cmp(&b.0.x).then(a.0.z.cmp(&b.0.z)));

        for h in 0..holes.len() {
            let (_, leftmost, hole) = holes[h];
            let hole_len = self.contours[hole].vertices.len();
            let mut best_vertex = leftmost;
            let mut index = None;

            for _ in 0..hole_len {
                // The diagonal must lie in the cone of three consecutive outline vertices.
                let corner = self.contours[hole].vertices[best_vertex].position;
                let outline_vertices = &self.contours[outline].vertices;
                let mut diagonals: Vec<(usize, i64)> = (0..outline_vertices.len())
                    .filter(|&j| in_cone(j, outline_vertices, corner))
                    .map(|j| {
                        let d = outline_vertices[j].position - corner;
                        (j, d.x as i64 * d.x as i64 + d.z as i64 * d.z as i64)
                    })
                    .collect();
                // Prefer the shortest connection.
                diagonals.sort_by_key(|&(_, distance)| distance);

                index = diagonals.into_iter().map(|(j, _)| j).find(|&j| {
                    let point = outline_vertices[j].position;
                    if intersect_seg_contour(point, corner, Some(j), outline_vertices) {
                        return false;
                    }
                    !holes[h..].iter().any(|&(_, _, other)| {
                        intersect_seg_contour(point, corner, None, &self.contours[other].vertices)
                    })
                });
                if index.is_some() {
                    break;
                }
                // Every diagonal intersected, try the next vertex.
                best_vertex = (best_vertex + 1) % hole_len;
            }

            let Some(index) = index else {
                warn!(
                    region = self.contours[outline].region.bits(),
                    "failed to find merge points for contour hole"
                );
                continue;
            };
            let (outline_contour, hole_contour) = pair_mut(&mut self.contours, outline, hole);
            merge_contours(outline_contour, hole_contour, index, best_vertex);
        }
    }
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSet {
    /// The contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space, excluding the border.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contour {
    /// Simplified contour vertices.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertices.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

/// A contour vertex in cell coordinates, relative to the tile without its border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContourVertex {
    /// Cell coordinates. `y` is in cell-height units.
    pub position: IVec3,
    /// The neighboring region across the following edge, plus vertex flags.
    pub flags: RegionVertexId,
}

bitflags::bitflags! {
    /// Region id and flags stored per contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegionVertexId: u32 {
        /// Applied to the region id field of contour vertices in order to extract the region id.
        const REGION_MASK = 0xffff;

        /// Border vertex flag.
        /// If a contour vertex has this bit set, the vertex lies on a tile border and will later
        /// be removed in order to match the segments and vertices at tile boundaries.
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a contour vertex has this bit set, then the associated edge lies on
        /// the border of an area.
        const AREA_BORDER = 0x20_000;
    }
}

impl RegionVertexId {
    /// No neighbor region and no flags.
    pub const NONE: Self = Self::empty();

    /// The neighboring region id without flags.
    #[inline]
    pub fn region(self) -> RegionId {
        RegionId::from_bits_retain((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        HeightfieldBuilder,
        heightfield::{Heightfield, SpanInsertion},
        span::SpanBuilder,
    };

    use super::*;

    fn square_field(size: u16, hole: Option<(u16, u16, u16, u16)>) -> CompactHeightfield {
        let mut heightfield: Heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size as f32, 10.0, size as f32),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                if let Some((x0, x1, z0, z1)) = hole
                    && (x0..x1).contains(&x)
                    && (z0..z1).contains(&z)
                {
                    continue;
                }
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min: 0,
                            max: 1,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 0, 400).unwrap();
        compact
    }

    #[test]
    fn square_region_simplifies_to_four_corners() {
        let compact = square_field(8, None);
        let cset = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.vertices.len(), 4);
        let mut corners: Vec<(i32, i32)> = contour
            .vertices
            .iter()
            .map(|v| (v.position.x, v.position.z))
            .collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 8), (8, 0), (8, 8)]);
        assert_eq!(contour.raw_vertices.len(), 32);
        assert!(polygon_area_2d(&contour.vertices) > 0);
    }

    #[test]
    fn long_wall_edges_are_split() {
        let compact = square_field(8, None);
        let cset = compact.build_contours(1.3, 3, BuildContoursFlags::DEFAULT);
        let contour = &cset.contours[0];
        assert!(contour.vertices.len() > 4);
        for (i, vertex) in contour.vertices.iter().enumerate() {
            let next_vertex = contour.vertices[next(i, contour.vertices.len())];
            let d = next_vertex.position - vertex.position;
            assert!(d.x * d.x + d.z * d.z <= 9, "edge {i} too long");
        }
    }

    #[test]
    fn holes_are_merged_into_the_outline() {
        let compact = square_field(12, Some((5, 7, 5, 7)));
        let cset = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert!(cset.contours.iter().all(|contour| polygon_area_2d(&contour.vertices) >= 0));
        let total: usize = cset.contours.iter().map(|c| c.vertices.len()).sum();
        // Outline corners, hole corners and the two bridge duplicates.
        assert!(total >= 10);
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let vertex = |x, z| ContourVertex {
            position: IVec3::new(x, 0, z),
            flags: RegionVertexId::NONE,
        };
        let mut vertices = vec![vertex(0, 0), vertex(0, 0), vertex(4, 0), vertex(4, 4)];
        remove_degenerate_segments(&mut vertices);
        assert_eq!(vertices.len(), 3);
    }
}
