//! Height detail triangles for each polygon of a [`PolygonNavmesh`].

use std::collections::VecDeque;

use glam::{U16Vec3, Vec3A};
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    CompactHeightfield, PolygonNavmesh, RegionId,
    math::{dir_for_offset, dir_offset_x, dir_offset_z, distance_squared_pt_seg, distance_squared_pt_seg_2d, next, prev},
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data, one per polygon.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles and their edge flags.
    ///
    /// Indices are relative to the owning sub-mesh's first vertex.
    /// Bits `0-1`, `2-3` and `4-5` of the flags are set when the respective edge lies on the
    /// polygon boundary.
    pub triangles: Vec<(U16Vec3, u8)>,
}

/// The range of [`DetailNavmesh`] vertices and triangles belonging to one polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct SubMesh {
    pub first_vertex_index: usize,
    pub vertex_count: usize,
    pub first_triangle_index: usize,
    pub triangle_count: usize,
}

const UNSET_HEIGHT: u16 = u16::MAX;
const MAX_VERTS: usize = 127;
// Limited by the 6 bit edge flags and u8 detail indices of the tile format.
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// `sample_distance` is the world-space spacing of height samples. `sample_max_error` is the
    /// maximum distance the detail surface may deviate from the heightfield.
    pub fn new(
        mesh: &PolygonNavmesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut detail = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(detail);
        }

        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let origin = mesh.aabb.min;
        let border_size = mesh.border_size as i32;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let bounds: Vec<Bounds> = (0..mesh.polygon_count())
            .map(|i| {
                let mut bounds = Bounds {
                    xmin: heightfield.width as i32,
                    xmax: 0,
                    zmin: heightfield.height as i32,
                    zmax: 0,
                };
                for &v in mesh.polygon_vertices(i) {
                    let v = mesh.vertices[v as usize];
                    bounds.xmin = bounds.xmin.min(v.x as i32);
                    bounds.xmax = bounds.xmax.max(v.x as i32);
                    bounds.zmin = bounds.zmin.min(v.z as i32);
                    bounds.zmax = bounds.zmax.max(v.z as i32);
                }
                bounds.xmin = 0.max(bounds.xmin - 1);
                bounds.xmax = (heightfield.width as i32).min(bounds.xmax + 1);
                bounds.zmin = 0.max(bounds.zmin - 1);
                bounds.zmax = (heightfield.height as i32).min(bounds.zmax + 1);
                bounds
            })
            .collect();

        let mut patch = HeightPatch::default();
        for (i, bounds) in bounds.iter().enumerate() {
            let polygon = mesh.polygon_vertices(i);
            let local_polygon: Vec<Vec3A> = polygon
                .iter()
                .map(|&v| {
                    let v = mesh.vertices[v as usize];
                    Vec3A::new(v.x as f32 * cs, v.y as f32 * ch, v.z as f32 * cs)
                })
                .collect();

            patch.xmin = bounds.xmin;
            patch.zmin = bounds.zmin;
            patch.width = (bounds.xmax - bounds.xmin).max(1);
            patch.height = (bounds.zmax - bounds.zmin).max(1);
            patch.fill_from(heightfield, polygon, &mesh.vertices, border_size, mesh.regions[i]);

            let sampler = PolySampler {
                heightfield,
                patch: &patch,
                sample_distance,
                sample_max_error,
                height_search_radius,
            };
            let (mut vertices, triangles) = sampler.build(&local_polygon);

            // Move detail verts to world space.
            for v in &mut vertices {
                *v += origin;
                v.y += heightfield.cell_height;
            }
            let world_polygon: Vec<Vec3A> = local_polygon.iter().map(|v| *v + origin).collect();

            if detail.vertices.len() + vertices.len() > u32::MAX as usize {
                return Err(DetailNavmeshError::TooManyVertices(detail.vertices.len()));
            }
            detail.meshes.push(SubMesh {
                first_vertex_index: detail.vertices.len(),
                vertex_count: vertices.len(),
                first_triangle_index: detail.triangles.len(),
                triangle_count: triangles.len(),
            });
            for [a, b, c] in triangles {
                let flags = triangle_flags(vertices[a], vertices[b], vertices[c], &world_polygon);
                detail
                    .triangles
                    .push((U16Vec3::new(a as u16, b as u16, c as u16), flags));
            }
            detail.vertices.extend(vertices);
        }
        Ok(detail)
    }

    /// The vertices of the sub-mesh of polygon `i`.
    pub fn submesh_vertices(&self, i: usize) -> &[Vec3A] {
        let mesh = &self.meshes[i];
        &self.vertices[mesh.first_vertex_index..mesh.first_vertex_index + mesh.vertex_count]
    }

    /// The triangles of the sub-mesh of polygon `i`.
    pub fn submesh_triangles(&self, i: usize) -> &[(U16Vec3, u8)] {
        let mesh = &self.meshes[i];
        &self.triangles[mesh.first_triangle_index..mesh.first_triangle_index + mesh.triangle_count]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bounds {
    xmin: i32,
    xmax: i32,
    zmin: i32,
    zmax: i32,
}

/// Span heights of the cells under one polygon, in cell units.
#[derive(Debug, Default)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    #[inline]
    fn index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    fn contains(&self, x: i32, z: i32) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&z)
    }

    /// Collects the heights of the polygon's region by flood filling from its border spans.
    fn fill_from(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[u16],
        vertices: &[U16Vec3],
        border_size: i32,
        region: RegionId,
    ) {
        self.data.clear();
        self.data.resize((self.width * self.height) as usize, UNSET_HEIGHT);
        let mut queue: VecDeque<(i32, i32, usize)> = VecDeque::new();

        let mut empty = true;
        // Polygons merged from several regions cannot be sampled by region.
        if region != RegionId::NONE {
            for hz in 0..self.height {
                let z = self.zmin + hz + border_size;
                for hx in 0..self.width {
                    let x = self.xmin + hx + border_size;
                    let Some(cell) = heightfield.get_cell_at(x as u16, z as u16) else {
                        continue;
                    };
                    let Some(i) = cell
                        .index_range()
                        .find(|&i| heightfield.spans[i].region == region)
                    else {
                        continue;
                    };
                    let index = self.index(hx, hz);
                    self.data[index] = heightfield.spans[i].y;
                    empty = false;

                    // Spans next to another region seed the flood fill.
                    let on_border = (0..4).any(|dir| {
                        heightfield
                            .neighbor_index(x as u16, z as u16, i, dir)
                            .is_some_and(|n| heightfield.spans[n].region != region)
                    });
                    if on_border {
                        queue.push_back((x, z, i));
                    }
                }
            }
        }

        // Rare, but happens when the polygon holds no span of its region, or when it could
        // overlap polygons of the same region.
        if empty {
            self.seed_with_polygon_center(heightfield, polygon, vertices, border_size, &mut queue);
        }

        // The seeds lie inside the polygon, so the fill does not leak onto overlapping floors.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = heightfield.neighbor(cx as u16, cz as u16, ci, dir) else {
                    continue;
                };
                let hx = ax as i32 - self.xmin - border_size;
                let hz = az as i32 - self.zmin - border_size;
                if !self.contains(hx, hz) {
                    continue;
                }
                let index = self.index(hx, hz);
                if self.data[index] != UNSET_HEIGHT {
                    continue;
                }
                self.data[index] = heightfield.spans[ai].y;
                queue.push_back((ax as i32, az as i32, ai));
            }
        }
    }

    /// Walks from the span closest to a polygon vertex towards the polygon center and seeds the
    /// queue with the span found there.
    fn seed_with_polygon_center(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[u16],
        vertices: &[U16Vec3],
        border_size: i32,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) {
        const OFFSETS: [(i32, i32); 9] = [(0, 0), (-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0)];

        let mut start: Option<(i32, i32, usize)> = None;
        let mut dmin = UNSET_HEIGHT;
        for &v in polygon {
            let v = vertices[v as usize];
            for (ox, oz) in OFFSETS {
                let ax = v.x as i32 + ox;
                let az = v.z as i32 + oz;
                if ax < self.xmin || ax >= self.xmin + self.width || az < self.zmin || az >= self.zmin + self.height {
                    continue;
                }
                let Some(cell) = heightfield.get_cell_at((ax + border_size) as u16, (az + border_size) as u16) else {
                    continue;
                };
                for i in cell.index_range() {
                    let d = heightfield.spans[i].y.abs_diff(v.y);
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                }
            }
        }
        let Some(start) = start else {
            warn!("no span found near polygon vertices for height sampling");
            return;
        };

        let count = polygon.len() as i32;
        let (sum_x, sum_z) = polygon.iter().fold((0, 0), |(x, z), &v| {
            let v = vertices[v as usize];
            (x + v.x as i32, z + v.z as i32)
        });
        let (pcx, pcz) = (sum_x / count, sum_z / count);

        // Depth-first walk towards the center, visiting the direct direction first.
        self.data.fill(0);
        let mut stack = vec![start];
        let mut dirs = [0_u8, 1, 2, 3];
        let mut current = start;
        loop {
            let Some((cx, cz, ci)) = stack.pop() else {
                warn!("walk towards polygon center failed to reach center");
                break;
            };
            current = (cx, cz, ci);
            if cx == pcx && cz == pcz {
                break;
            }
            let direct_dir = if cx == pcx {
                dir_for_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;
            dirs.swap(direct_dir, 3);
            for &dir in &dirs {
                let Some(con) = heightfield.spans[ci].con(dir) else {
                    continue;
                };
                let nx = cx + dir_offset_x(dir);
                let nz = cz + dir_offset_z(dir);
                let hx = nx - self.xmin;
                let hz = nz - self.zmin;
                if !self.contains(hx, hz) {
                    continue;
                }
                let index = self.index(hx, hz);
                if self.data[index] != 0 {
                    continue;
                }
                self.data[index] = 1;
                let cell = heightfield.cell_at((nx + border_size) as u16, (nz + border_size) as u16);
                stack.push((nx, nz, cell.index() as usize + con as usize));
            }
            dirs.swap(direct_dir, 3);
        }

        let (cx, cz, ci) = current;
        self.data.fill(UNSET_HEIGHT);
        let index = self.index(cx - self.xmin, cz - self.zmin);
        self.data[index] = heightfield.spans[ci].y;
        queue.clear();
        queue.push_back((cx + border_size, cz + border_size, ci));
    }

    /// Height at the local position `(fx, fz)` in cell units. Falls back to the closest set height
    /// in a spiral of `radius` cells when the cell under the position is unset.
    fn height_at(&self, fx: f32, fy: f32, fz: f32, cs: f32, ch: f32, radius: i32) -> u16 {
        let ix = ((fx / cs + 0.01).floor() as i32 - self.xmin).clamp(0, self.width - 1);
        let iz = ((fz / cs + 0.01).floor() as i32 - self.zmin).clamp(0, self.height - 1);
        let mut h = self.data[self.index(ix, iz)];
        if h != UNSET_HEIGHT {
            return h;
        }

        let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
        let max_size = radius * 2 + 1;
        let max_iterations = max_size * max_size - 1;
        let mut next_ring_start = 8;
        let mut next_ring_iterations = 16;
        let mut dmin = f32::MAX;
        for i in 0..max_iterations {
            let nx = ix + x;
            let nz = iz + z;
            if self.contains(nx, nz) {
                let nh = self.data[self.index(nx, nz)];
                if nh != UNSET_HEIGHT {
                    let d = (nh as f32 * ch - fy).abs();
                    if d < dmin {
                        h = nh;
                        dmin = d;
                    }
                }
            }
            // Stop after the first ring that produced a height.
            if i + 1 == next_ring_start {
                if h != UNSET_HEIGHT {
                    break;
                }
                next_ring_start += next_ring_iterations;
                next_ring_iterations += 8;
            }
            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                (dx, dz) = (-dz, dx);
            }
            x += dx;
            z += dz;
        }
        h
    }
}

struct PolySampler<'a> {
    heightfield: &'a CompactHeightfield,
    patch: &'a HeightPatch,
    sample_distance: f32,
    sample_max_error: f32,
    height_search_radius: i32,
}

impl PolySampler<'_> {
    fn sample_height(&self, pos: Vec3A) -> f32 {
        let cs = self.heightfield.cell_size;
        let ch = self.heightfield.cell_height;
        self.patch
            .height_at(pos.x, pos.y, pos.z, cs, ch, self.height_search_radius) as f32
            * ch
    }

    /// Builds the detail vertices and triangles of one polygon in patch-local space.
    fn build(&self, polygon: &[Vec3A]) -> (Vec<Vec3A>, Vec<[usize; 3]>) {
        let nin = polygon.len();
        let mut vertices = polygon.to_vec();
        let mut hull = Vec::with_capacity(MAX_VERTS);
        let cs = self.heightfield.cell_size;
        let ch = self.heightfield.cell_height;

        let min_extent = poly_min_extent(polygon);

        // Tessellate the outline first so that height values match across polygon boundaries.
        if self.sample_distance > 0.0 {
            let mut j = nin - 1;
            for i in 0..nin {
                let (mut vj, mut vi) = (polygon[j], polygon[i]);
                // Process edges in a consistent order, or neighbors get seams.
                let swapped = if (vj.x - vi.x).abs() < 1e-6 {
                    vj.z > vi.z
                } else {
                    vj.x > vi.x
                };
                if swapped {
                    std::mem::swap(&mut vj, &mut vi);
                }

                let delta = vi - vj;
                let d = (delta.x * delta.x + delta.z * delta.z).sqrt();
                let mut nn = 1 + (d / self.sample_distance).floor() as usize;
                nn = nn.min(MAX_VERTS_PER_EDGE - 1);
                if vertices.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(vertices.len()).max(1);
                }

                let edge: Vec<Vec3A> = (0..=nn)
                    .map(|k| {
                        let u = k as f32 / nn as f32;
                        let mut pos = vj + delta * u;
                        pos.y = self.sample_height(pos);
                        pos
                    })
                    .collect();

                // Simplify samples.
                let mut idx = vec![0, nn];
                let mut k = 0;
                while k + 1 < idx.len() {
                    let (a, b) = (idx[k], idx[k + 1]);
                    let (va, vb) = (edge[a], edge[b]);
                    let mut maxd = 0.0;
                    let mut maxi = None;
                    for (m, &point) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_squared_pt_seg(point, va, vb);
                        if dev > maxd {
                            maxd = dev;
                            maxi = Some(m);
                        }
                    }
                    match maxi {
                        Some(m) if maxd > self.sample_max_error * self.sample_max_error => {
                            idx.insert(k + 1, m);
                        }
                        _ => k += 1,
                    }
                }

                hull.push(j);
                let inner = &idx[1..idx.len() - 1];
                let mut add = |k: usize| {
                    if vertices.len() < MAX_VERTS {
                        hull.push(vertices.len());
                        vertices.push(edge[k]);
                    }
                };
                if swapped {
                    inner.iter().rev().for_each(|&k| add(k));
                } else {
                    inner.iter().for_each(|&k| add(k));
                }
                j = i;
            }
        } else {
            hull.extend(0..nin);
        }

        let mut triangles = triangulate_hull(&vertices, &hull, nin);

        // Slivers and small triangles get no interior samples.
        if min_extent < self.sample_distance * 2.0 {
            return (vertices, triangles);
        }
        if triangles.is_empty() {
            warn!(vertices = nin, "could not triangulate polygon");
            return (vertices, triangles);
        }

        if self.sample_distance > 0.0 {
            let (bmin, bmax) = polygon.iter().fold((polygon[0], polygon[0]), |(min, max), &v| (min.min(v), max.max(v)));
            let x0 = (bmin.x / self.sample_distance).floor() as i32;
            let x1 = (bmax.x / self.sample_distance).ceil() as i32;
            let z0 = (bmin.z / self.sample_distance).floor() as i32;
            let z1 = (bmax.z / self.sample_distance).ceil() as i32;

            let mut samples: Vec<(i32, u16, i32, bool)> = Vec::new();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * self.sample_distance,
                        (bmax.y + bmin.y) * 0.5,
                        z as f32 * self.sample_distance,
                    );
                    // Keep samples away from the edges.
                    if dist_to_poly(polygon, pt) > -self.sample_distance / 2.0 {
                        continue;
                    }
                    let h = self
                        .patch
                        .height_at(pt.x, pt.y, pt.z, cs, ch, self.height_search_radius);
                    samples.push((x, h, z, false));
                }
            }

            // Add the sample with the most error until all are within the threshold.
            for _ in 0..samples.len() {
                if vertices.len() >= MAX_VERTS {
                    break;
                }
                let mut best: Option<(usize, f32, Vec3A)> = None;
                for (i, &(x, h, z, added)) in samples.iter().enumerate() {
                    if added {
                        continue;
                    }
                    let pt = Vec3A::new(
                        x as f32 * self.sample_distance + jitter_x(i) * cs * 0.1,
                        h as f32 * ch,
                        z as f32 * self.sample_distance + jitter_z(i) * cs * 0.1,
                    );
                    let Some(d) = dist_to_tri_mesh(pt, &vertices, &triangles) else {
                        continue;
                    };
                    if best.is_none_or(|(_, best_d, _)| d > best_d) {
                        best = Some((i, d, pt));
                    }
                }
                let Some((index, d, pt)) = best else {
                    break;
                };
                if d <= self.sample_max_error {
                    break;
                }
                samples[index].3 = true;
                vertices.push(pt);
                // TODO: add the sample incrementally instead of rebuilding the triangulation.
                triangles = delaunay_hull(&vertices, &hull);
            }
        }

        if triangles.len() > MAX_TRIS {
            error!(
                "shrinking detail triangle count from {} to max {MAX_TRIS}",
                triangles.len()
            );
            triangles.truncate(MAX_TRIS);
        }
        (vertices, triangles)
    }
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Distance between two points on the xz-plane.
fn dist_2d(a: Vec3A, b: Vec3A) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

fn cross_2d(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

/// The smallest of the polygon's per-edge maximum vertex distances.
fn poly_min_extent(polygon: &[Vec3A]) -> f32 {
    let n = polygon.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let (p1, p2) = (polygon[i], polygon[ni]);
        let max_edge_dist = (0..n)
            .filter(|&j| j != i && j != ni)
            .map(|j| distance_squared_pt_seg_2d(polygon[j], p1, p2))
            .fold(0.0_f32, f32::max);
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

/// Signed distance from `p` to the polygon outline on the xz-plane, negative inside.
fn dist_to_poly(polygon: &[Vec3A], p: Vec3A) -> f32 {
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (vi, vj) = (polygon[i], polygon[j]);
        if (vi.z > p.z) != (vj.z > p.z) && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x {
            inside = !inside;
        }
        dmin = dmin.min(distance_squared_pt_seg_2d(p, vj, vi));
        j = i;
    }
    if inside { -dmin } else { dmin }
}

/// Height of the triangle `abc` under `p`, if `p` projects into it.
fn closest_height_on_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }
    (u >= 0.0 && v >= 0.0 && u + v <= denom).then(|| a.y + (v0.y * u + v1.y * v) / denom)
}

fn dist_to_tri_mesh(p: Vec3A, vertices: &[Vec3A], triangles: &[[usize; 3]]) -> Option<f32> {
    triangles
        .iter()
        .filter_map(|&[a, b, c]| closest_height_on_triangle(p, vertices[a], vertices[b], vertices[c]))
        .map(|h| (h - p.y).abs())
        .min_by(f32::total_cmp)
}

/// Fans the hull into triangles, starting at the original-vertex ear with the shortest perimeter
/// and then advancing on whichever side yields the shorter next triangle.
fn triangulate_hull(vertices: &[Vec3A], hull: &[usize], nin: usize) -> Vec<[usize; 3]> {
    let nhull = hull.len();
    let mut triangles = Vec::with_capacity(nhull.saturating_sub(2));
    if nhull < 3 {
        return triangles;
    }
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    let mut dmin = f32::MAX;
    for i in 0..nhull {
        // Ears with tessellated edge vertices in the middle are segments, not triangles.
        if hull[i] >= nin {
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = vertices[hull[pi]];
        let cv = vertices[hull[i]];
        let nv = vertices[hull[ni]];
        let d = dist_2d(pv, cv) + dist_2d(cv, nv) + dist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    triangles.push([hull[start], hull[left], hull[right]]);
    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);
        let cvleft = vertices[hull[left]];
        let nvleft = vertices[hull[nleft]];
        let cvright = vertices[hull[right]];
        let nvright = vertices[hull[nright]];
        let dleft = dist_2d(cvleft, nvleft) + dist_2d(nvleft, cvright);
        let dright = dist_2d(cvright, nvright) + dist_2d(cvleft, nvright);
        if dleft < dright {
            triangles.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            triangles.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
    triangles
}

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

/// Edge of the Delaunay triangulation: start vertex, end vertex, left face, right face.
type DelaunayEdge = [i32; 4];

struct Delaunay<'a> {
    points: &'a [Vec3A],
    edges: Vec<DelaunayEdge>,
    max_edges: usize,
    faces: i32,
}

impl Delaunay<'_> {
    fn find_edge(&self, s: i32, t: i32) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
    }

    fn add_edge(&mut self, s: i32, t: i32, left: i32, right: i32) {
        if self.edges.len() >= self.max_edges {
            error!(max = self.max_edges, "too many delaunay edges");
            return;
        }
        if self.find_edge(s, t).is_none() {
            self.edges.push([s, t, left, right]);
        }
    }

    fn update_left_face(&mut self, e: usize, s: i32, t: i32, face: i32) {
        let edge = &mut self.edges[e];
        if edge[0] == s && edge[1] == t && edge[2] == EV_UNDEF {
            edge[2] = face;
        } else if edge[1] == s && edge[0] == t && edge[3] == EV_UNDEF {
            edge[3] = face;
        }
    }

    fn overlaps_edges(&self, s1: i32, t1: i32) -> bool {
        self.edges.iter().any(|e| {
            let (s0, t0) = (e[0], e[1]);
            // Same or connected edges do not overlap.
            if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
                return false;
            }
            let p = |i: i32| self.points[i as usize];
            overlap_seg_seg_2d(p(s0), p(t0), p(s1), p(t1))
        })
    }

    fn complete_facet(&mut self, e: usize) {
        const EPS: f32 = 1e-5;
        const TOLERANCE: f32 = 0.001;

        let edge = self.edges[e];
        let (s, t) = if edge[2] == EV_UNDEF {
            (edge[0], edge[1])
        } else if edge[3] == EV_UNDEF {
            (edge[1], edge[0])
        } else {
            return;
        };
        let ps = self.points[s as usize];
        let pt_t = self.points[t as usize];

        // Find the best point on the left of the edge.
        let mut best: Option<i32> = None;
        let mut center = Vec3A::ZERO;
        let mut radius = -1.0;
        for u in 0..self.points.len() as i32 {
            if u == s || u == t {
                continue;
            }
            let pu = self.points[u as usize];
            if cross_2d(ps, pt_t, pu) <= EPS {
                continue;
            }
            if radius < 0.0 {
                best = Some(u);
                (center, radius) = circum_circle(ps, pt_t, pu);
                continue;
            }
            let d = dist_2d(center, pu);
            if d > radius * (1.0 + TOLERANCE) {
                continue;
            }
            if d >= radius * (1.0 - TOLERANCE) && (self.overlaps_edges(s, u) || self.overlaps_edges(t, u)) {
                continue;
            }
            best = Some(u);
            (center, radius) = circum_circle(ps, pt_t, pu);
        }

        let Some(pt) = best else {
            self.update_left_face(e, s, t, EV_HULL);
            return;
        };
        let face = self.faces;
        self.update_left_face(e, s, t, face);
        match self.find_edge(pt, s) {
            Some(existing) => self.update_left_face(existing, pt, s, face),
            None => self.add_edge(pt, s, face, EV_UNDEF),
        }
        match self.find_edge(t, pt) {
            Some(existing) => self.update_left_face(existing, t, pt, face),
            None => self.add_edge(t, pt, face, EV_UNDEF),
        }
        self.faces += 1;
    }
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = cross_2d(a, b, d);
    let a2 = cross_2d(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross_2d(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

/// Circumcircle of the triangle on the xz-plane, computed relative to `p1` for precision.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1e-6;
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;
    let cp = cross_2d(v1, v2, v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let dot_2d = |v: Vec3A| v.x * v.x + v.z * v.z;
    let (v1_sq, v2_sq, v3_sq) = (dot_2d(v1), dot_2d(v2), dot_2d(v3));
    let center = Vec3A::new(
        (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
        0.0,
        (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
    );
    let radius = dist_2d(center, v1);
    (center + p1, radius)
}

/// Delaunay triangulation of `points` constrained to the convex `hull`.
fn delaunay_hull(points: &[Vec3A], hull: &[usize]) -> Vec<[usize; 3]> {
    let mut delaunay = Delaunay {
        points,
        edges: Vec::with_capacity(points.len() * 10),
        max_edges: points.len() * 10,
        faces: 0,
    };
    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        delaunay.add_edge(hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current = 0;
    while current < delaunay.edges.len() {
        if delaunay.edges[current][2] == EV_UNDEF {
            delaunay.complete_facet(current);
        }
        if delaunay.edges[current][3] == EV_UNDEF {
            delaunay.complete_facet(current);
        }
        current += 1;
    }

    let mut faces = vec![[-1_i32; 3]; delaunay.faces as usize];
    for e in &delaunay.edges {
        if e[3] >= 0 {
            // Left face.
            let t = &mut faces[e[3] as usize];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            // Right face.
            let t = &mut faces[e[2] as usize];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }

    faces
        .into_iter()
        .enumerate()
        .filter_map(|(i, t)| {
            if t.contains(&-1) {
                warn!(face = i, "removing dangling face {t:?}");
                None
            } else {
                Some(t.map(|v| v as usize))
            }
        })
        .collect()
}

/// Marks each triangle edge that lies on the polygon outline.
fn triangle_flags(va: Vec3A, vb: Vec3A, vc: Vec3A, polygon: &[Vec3A]) -> u8 {
    edge_flag(va, vb, polygon) | edge_flag(vb, vc, polygon) << 2 | edge_flag(vc, va, polygon) << 4
}

fn edge_flag(va: Vec3A, vb: Vec3A, polygon: &[Vec3A]) -> u8 {
    const THRESHOLD_SQUARED: f32 = 0.001 * 0.001;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        if distance_squared_pt_seg_2d(va, polygon[j], polygon[i]) < THRESHOLD_SQUARED
            && distance_squared_pt_seg_2d(vb, polygon[j], polygon[i]) < THRESHOLD_SQUARED
        {
            return 1;
        }
        j = i;
    }
    0
}

/// Errors that can occur when building a [`DetailNavmesh`].
#[derive(Error, Debug)]
pub enum DetailNavmeshError {
    /// The detail mesh has more vertices than can be indexed.
    #[error("too many detail vertices: {0}")]
    TooManyVertices(usize),
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square(size: f32) -> Vec<Vec3A> {
        vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, size),
            Vec3A::new(size, 0.0, size),
            Vec3A::new(size, 0.0, 0.0),
        ]
    }

    #[test]
    fn hull_of_square_is_two_triangles() {
        let vertices = square(2.0);
        let triangles = triangulate_hull(&vertices, &[0, 1, 2, 3], 4);
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn delaunay_uses_interior_point() {
        let mut vertices = square(2.0);
        vertices.push(Vec3A::new(1.0, 0.0, 0.8));
        let triangles = delaunay_hull(&vertices, &[0, 1, 2, 3]);
        assert_eq!(triangles.len(), 4);
        assert!(triangles.iter().filter(|t| t.contains(&4)).count() >= 3);
    }

    #[test]
    fn triangle_height_interpolates() {
        let a = Vec3A::new(0.0, 0.0, 0.0);
        let b = Vec3A::new(0.0, 0.0, 2.0);
        let c = Vec3A::new(2.0, 2.0, 0.0);
        let h = closest_height_on_triangle(Vec3A::new(1.0, 10.0, 0.5), a, b, c).unwrap();
        assert_relative_eq!(h, 1.0);
        assert!(closest_height_on_triangle(Vec3A::new(5.0, 0.0, 5.0), a, b, c).is_none());
    }

    #[test]
    fn point_inside_polygon_has_negative_distance() {
        let polygon = square(4.0);
        assert!(dist_to_poly(&polygon, Vec3A::new(2.0, 0.0, 2.0)) < 0.0);
        assert!(dist_to_poly(&polygon, Vec3A::new(6.0, 0.0, 2.0)) > 0.0);
    }

    #[test]
    fn height_patch_falls_back_to_nearest_sample() {
        let mut patch = HeightPatch {
            data: vec![UNSET_HEIGHT; 9],
            xmin: 0,
            zmin: 0,
            width: 3,
            height: 3,
        };
        let i = patch.index(2, 1);
        patch.data[i] = 7;
        assert_eq!(patch.height_at(1.5, 0.0, 1.5, 1.0, 1.0, 1), 7);
        assert_eq!(patch.height_at(2.5, 0.0, 1.5, 1.0, 1.0, 1), 7);
    }

    #[test]
    fn jitter_stays_in_unit_range() {
        for i in 0..64 {
            assert!((-1.0..=1.0).contains(&jitter_x(i)));
            assert!((-1.0..=1.0).contains(&jitter_z(i)));
        }
    }

    #[test]
    fn boundary_edges_are_flagged() {
        let polygon = square(2.0);
        let flags = triangle_flags(polygon[0], polygon[1], polygon[2], &polygon);
        // Edges 0-1 and 1-2 are on the outline, 2-0 is the diagonal.
        assert_eq!(flags, 0b0101);
    }
}
