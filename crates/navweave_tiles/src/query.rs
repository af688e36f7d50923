//! Spatial and path queries against a [`NavmeshStore`].

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
};

use bitflags::bitflags;
use glam::Vec3A;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    MeshTile, NavmeshStore, PolyRef,
    math::{
        closest_height_point_triangle, distance_pt_poly_edges_sqr, distance_pt_seg_sqr_2d,
        intersect_segment_poly_2d, overlap_poly_poly_2d, point_in_polygon, tri_area_2d, v_equal,
    },
    store::Link,
    tile_data::{EXT_LINK, TilePolygon},
};

/// Scale of the A* heuristic. Slightly below 1 to keep it admissible.
const H_SCALE: f32 = 0.999;

/// Maximum number of polygons kept in the search queue of local searches.
const MAX_STACK: usize = 48;

bitflags! {
    /// User flags of navmesh polygons.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PolyFlags: u16 {
        /// The polygon can be walked on.
        const WALK = 1;
    }
}

bitflags! {
    /// Describes a point of a straight path.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StraightPathFlags: u8 {
        /// The point is the start of the path.
        const START = 0x01;
        /// The point is the end of the path.
        const END = 0x02;
    }
}

/// Decides which polygons a query may visit and what it costs to cross them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    /// A polygon must have at least one of these flags.
    pub include_flags: PolyFlags,
    /// A polygon must have none of these flags.
    pub exclude_flags: PolyFlags,
    /// Traversal cost multiplier per area id.
    pub area_costs: [f32; 64],
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::from_bits_retain(0xffff),
            exclude_flags: PolyFlags::empty(),
            area_costs: [1.0; 64],
        }
    }
}

impl QueryFilter {
    /// Returns `true` if the polygon may be visited.
    #[inline]
    pub fn passes(&self, polygon: &TilePolygon) -> bool {
        let flags = PolyFlags::from_bits_retain(polygon.flags);
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }

    /// The cost of moving from `a` to `b` across `polygon`.
    #[inline]
    pub fn cost(&self, a: Vec3A, b: Vec3A, polygon: &TilePolygon) -> f32 {
        a.distance(b) * self.area_costs[(polygon.area & 0x3f) as usize]
    }
}

/// Errors returned by [`NavmeshQuery`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// The polygon reference does not point at a resident polygon.
    #[error("Invalid polygon reference {0:?}")]
    InvalidRef(PolyRef),
    /// The two polygons are not connected.
    #[error("Polygons {from:?} and {to:?} are not neighbors")]
    NotConnected {
        /// The polygon the portal was requested from.
        from: PolyRef,
        /// The polygon the portal was requested to.
        to: PolyRef,
    },
    /// An empty polygon path was given.
    #[error("The path is empty")]
    EmptyPath,
}

/// A polygon path returned by [`NavmeshQuery::find_path`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolyPath {
    /// The polygons from the start polygon to the last polygon reached.
    pub polygons: Vec<PolyRef>,
    /// `true` if the end polygon was not reached and the path leads to the closest polygon
    /// instead.
    pub partial: bool,
}

/// A corner of a straight path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    /// The position of the corner.
    pub position: Vec3A,
    /// Whether the corner is the start or the end of the path.
    pub flags: StraightPathFlags,
    /// The polygon entered at the corner, if any.
    pub poly: Option<PolyRef>,
}

/// The result of [`NavmeshQuery::move_along_surface`].
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMove {
    /// The position reached. Its height is not adjusted to the surface.
    pub position: Vec3A,
    /// The polygons visited from the start to the polygon containing the position.
    pub visited: Vec<PolyRef>,
}

/// The result of [`NavmeshQuery::raycast`].
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// The hit parameter along the ray, or [`f32::MAX`] if the end was reached.
    pub t: f32,
    /// The normal of the wall that was hit.
    pub normal: Vec3A,
    /// The polygons crossed by the ray.
    pub path: Vec<PolyRef>,
}

impl RaycastHit {
    /// Returns `true` if the ray hit a wall before its end.
    #[inline]
    pub fn hit_wall(&self) -> bool {
        self.t < f32::MAX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
struct Node {
    poly: PolyRef,
    position: Vec3A,
    cost: f32,
    total: f32,
    parent: Option<usize>,
    state: NodeState,
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    total: f32,
    node: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that the binary heap pops the cheapest node first.
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Runs queries against a [`NavmeshStore`].
#[derive(Debug, Clone, Copy)]
pub struct NavmeshQuery<'a> {
    store: &'a NavmeshStore,
    max_nodes: usize,
}

impl<'a> NavmeshQuery<'a> {
    /// The default number of nodes a path search may visit.
    pub const DEFAULT_MAX_NODES: usize = 2048;

    /// Creates a query against `store`.
    pub fn new(store: &'a NavmeshStore) -> Self {
        Self {
            store,
            max_nodes: Self::DEFAULT_MAX_NODES,
        }
    }

    /// Limits the number of nodes [`Self::find_path`] may visit.
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes.max(1);
        self
    }

    /// The store the query runs against.
    #[inline]
    pub fn store(&self) -> &'a NavmeshStore {
        self.store
    }

    fn resolve(&self, poly: PolyRef) -> Result<(&'a MeshTile, usize), QueryError> {
        self.store
            .tile_and_poly(poly)
            .ok_or(QueryError::InvalidRef(poly))
    }

    /// Returns `true` if `poly` is resident and passes `filter`.
    pub fn is_valid_poly_ref(&self, poly: PolyRef, filter: &QueryFilter) -> bool {
        self.store
            .tile_and_poly(poly)
            .is_some_and(|(tile, i)| filter.passes(&tile.data().polygons[i]))
    }

    /// Finds the polygon nearest to `center` whose bounds overlap the box `center ± half_extents`.
    ///
    /// Points above a polygon within the tile's climb height are preferred over the straight
    /// line distance. Returns the polygon and the closest point on it.
    pub fn find_nearest_poly(
        &self,
        center: Vec3A,
        half_extents: Vec3A,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3A)> {
        let bounds = navweave::Aabb3d {
            min: center - half_extents,
            max: center + half_extents,
        };
        let mut nearest = None;
        let mut nearest_distance = f32::MAX;
        for tile in self.store.tiles_overlapping(&bounds) {
            for (i, polygon) in tile.data().polygons.iter().enumerate() {
                if !filter.passes(polygon) || !tile.poly_bounds(i).intersects(&bounds) {
                    continue;
                }
                let poly = self.store.poly_ref(tile, i);
                let Ok((closest, over_poly)) = self.closest_point_on_poly(poly, center) else {
                    continue;
                };
                let diff = center - closest;
                let distance = if over_poly {
                    let d = diff.y.abs() - tile.data().header.walkable_climb;
                    if d > 0.0 { d * d } else { 0.0 }
                } else {
                    diff.length_squared()
                };
                if distance < nearest_distance {
                    nearest_distance = distance;
                    nearest = Some((poly, closest));
                }
            }
        }
        nearest
    }

    /// The height of the polygon's detail surface at `position`, or `None` if the position is not
    /// above or below the polygon.
    pub fn poly_height(&self, poly: PolyRef, position: Vec3A) -> Result<Option<f32>, QueryError> {
        let (tile, i) = self.resolve(poly)?;
        let vertices = tile.poly_vertices(i);
        if !point_in_polygon(position, &vertices) {
            return Ok(None);
        }
        if let Some((detail, triangles)) = tile.data().detail(i) {
            for triangle in triangles {
                let [a, b, c] = triangle.indices.map(|v| detail[v as usize]);
                if let Some(height) = closest_height_point_triangle(position, a, b, c) {
                    return Ok(Some(height));
                }
            }
        }
        // The point lies on an edge of the detail mesh.
        Ok(Some(closest_point_on_detail_edges(tile, i, position, false).y))
    }

    /// The point on `poly` closest to `position`, and whether `position` lies above or below the
    /// polygon.
    pub fn closest_point_on_poly(
        &self,
        poly: PolyRef,
        position: Vec3A,
    ) -> Result<(Vec3A, bool), QueryError> {
        if let Some(height) = self.poly_height(poly, position)? {
            return Ok((Vec3A::new(position.x, height, position.z), true));
        }
        let (tile, i) = self.resolve(poly)?;
        Ok((closest_point_on_detail_edges(tile, i, position, true), false))
    }

    /// The point on the boundary of `poly` closest to `position`, or `position` itself when it
    /// lies inside the polygon on the xz-plane. Heights come from the polygon vertices.
    pub fn closest_point_on_poly_boundary(
        &self,
        poly: PolyRef,
        position: Vec3A,
    ) -> Result<Vec3A, QueryError> {
        let (tile, i) = self.resolve(poly)?;
        let vertices = tile.poly_vertices(i);
        let (inside, edges) = distance_pt_poly_edges_sqr(position, &vertices);
        if inside {
            return Ok(position);
        }
        let Some((edge, (_, t))) = edges
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0))
        else {
            return Ok(position);
        };
        let va = vertices[edge];
        let vb = vertices[(edge + 1) % vertices.len()];
        Ok(va.lerp(vb, *t))
    }

    fn link_to(&self, from: PolyRef, to: PolyRef) -> Result<(&'a MeshTile, usize, Link), QueryError> {
        let (tile, i) = self.resolve(from)?;
        let link = tile
            .links(i)
            .iter()
            .find(|link| link.target == to)
            .copied()
            .ok_or(QueryError::NotConnected { from, to })?;
        Ok((tile, i, link))
    }

    /// The left and right end points of the edge shared by `from` and `to`, as seen when moving
    /// from `from` into `to`. Partial tile border links are clamped to the shared part.
    pub fn portal_points(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3A, Vec3A), QueryError> {
        let (tile, i, link) = self.link_to(from, to)?;
        let polygon = &tile.data().polygons[i];
        let edge = link.edge as usize;
        let v0 = tile.data().vertices[polygon.vertices[edge] as usize];
        let v1 = tile.data().vertices[polygon.vertices[(edge + 1) % polygon.vertices.len()] as usize];
        if link.is_partial() {
            let s = 1.0 / 255.0;
            return Ok((
                v0.lerp(v1, link.bmin as f32 * s),
                v0.lerp(v1, link.bmax as f32 * s),
            ));
        }
        Ok((v0, v1))
    }

    fn edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<Vec3A, QueryError> {
        let (left, right) = self.portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }

    /// Finds a polygon path from `start` to `end` with A*.
    ///
    /// If `end` cannot be reached, the path leads to the visited polygon closest to `end_pos`
    /// and is marked partial. At most `max_path` polygons are returned.
    pub fn find_path(
        &self,
        start: PolyRef,
        end: PolyRef,
        start_pos: Vec3A,
        end_pos: Vec3A,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PolyPath, QueryError> {
        self.resolve(start)?;
        self.resolve(end)?;
        if start == end {
            return Ok(PolyPath {
                polygons: vec![start],
                partial: false,
            });
        }

        let mut nodes = vec![Node {
            poly: start,
            position: start_pos,
            cost: 0.0,
            total: start_pos.distance(end_pos) * H_SCALE,
            parent: None,
            state: NodeState::Open,
        }];
        let mut lookup = HashMap::from([(start, 0)]);
        let mut open = BinaryHeap::from([OpenEntry {
            total: nodes[0].total,
            node: 0,
        }]);
        let mut last_best = 0;
        let mut last_best_cost = nodes[0].total;

        while let Some(entry) = open.pop() {
            let best = entry.node;
            if nodes[best].state == NodeState::Closed || entry.total != nodes[best].total {
                continue;
            }
            nodes[best].state = NodeState::Closed;
            let best_poly = nodes[best].poly;
            if best_poly == end {
                last_best = best;
                break;
            }

            let (tile, i) = self.resolve(best_poly)?;
            let parent_poly = nodes[best].parent.map(|parent| nodes[parent].poly);
            for link in tile.links(i) {
                let neighbor_poly = link.target;
                if Some(neighbor_poly) == parent_poly {
                    continue;
                }
                let Some((neighbor_tile, neighbor_index)) = self.store.tile_and_poly(neighbor_poly)
                else {
                    continue;
                };
                if !filter.passes(&neighbor_tile.data().polygons[neighbor_index]) {
                    continue;
                }

                let existing = lookup.get(&neighbor_poly).copied();
                if existing.is_none() && nodes.len() >= self.max_nodes {
                    continue;
                }
                let position = match existing {
                    Some(node) => nodes[node].position,
                    None => self.edge_mid_point(best_poly, neighbor_poly)?,
                };

                let current = &tile.data().polygons[i];
                let (cost, heuristic) = if neighbor_poly == end {
                    let neighbor = &neighbor_tile.data().polygons[neighbor_index];
                    let cost = nodes[best].cost
                        + filter.cost(nodes[best].position, position, current)
                        + filter.cost(position, end_pos, neighbor);
                    (cost, 0.0)
                } else {
                    (
                        nodes[best].cost + filter.cost(nodes[best].position, position, current),
                        position.distance(end_pos) * H_SCALE,
                    )
                };
                let total = cost + heuristic;

                let node = match existing {
                    Some(node) if total >= nodes[node].total => continue,
                    Some(node) => node,
                    None => {
                        nodes.push(Node {
                            poly: neighbor_poly,
                            position,
                            cost,
                            total,
                            parent: None,
                            state: NodeState::Open,
                        });
                        lookup.insert(neighbor_poly, nodes.len() - 1);
                        nodes.len() - 1
                    }
                };
                nodes[node].parent = Some(best);
                nodes[node].cost = cost;
                nodes[node].total = total;
                nodes[node].state = NodeState::Open;
                open.push(OpenEntry { total, node });

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = node;
                }
            }
        }

        let mut polygons = Vec::new();
        let mut current = Some(last_best);
        while let Some(node) = current {
            polygons.push(nodes[node].poly);
            current = nodes[node].parent;
        }
        polygons.reverse();
        polygons.truncate(max_path.max(1));
        Ok(PolyPath {
            partial: nodes[last_best].poly != end,
            polygons,
        })
    }

    /// Pulls the corners of the straight path along the polygon corridor `path` with the funnel
    /// algorithm.
    ///
    /// The start and end positions are clamped to the first and last polygon. At most
    /// `max_points` corners are returned.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3A,
        end_pos: Vec3A,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>, QueryError> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(QueryError::EmptyPath);
        };
        let mut straight = StraightPath {
            points: Vec::new(),
            max_points: max_points.max(1),
        };
        let closest_start = self.closest_point_on_poly_boundary(first, start_pos)?;
        let mut closest_end = self.closest_point_on_poly_boundary(last, end_pos)?;
        if straight.append(closest_start, StraightPathFlags::START, Some(first)) {
            return Ok(straight.points);
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly = Some(first);
            let mut right_poly = Some(first);

            let mut i = 0;
            while i < path.len() {
                let (left, right) = if i + 1 < path.len() {
                    match self.portal_points(path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // The corridor is broken, end the path at the last valid polygon.
                            closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            straight.append(closest_end, StraightPathFlags::END, None);
                            return Ok(straight.points);
                        }
                    }
                } else {
                    (closest_end, closest_end)
                };

                // Skip portals the start position lies on.
                if i == 0 && distance_pt_seg_sqr_2d(apex, left, right).0 < 0.001 * 0.001 {
                    i += 1;
                    continue;
                }

                let next_poly = path.get(i + 1).copied();

                if tri_area_2d(apex, portal_right, right) <= 0.0 {
                    if v_equal(apex, portal_right) || tri_area_2d(apex, portal_left, right) > 0.0 {
                        portal_right = right;
                        right_poly = next_poly;
                        right_index = i;
                    } else {
                        apex = portal_left;
                        let apex_index = left_index;
                        let flags = if left_poly.is_none() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if straight.append(apex, flags, left_poly) {
                            return Ok(straight.points);
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                if tri_area_2d(apex, portal_left, left) >= 0.0 {
                    if v_equal(apex, portal_left) || tri_area_2d(apex, portal_right, left) < 0.0 {
                        portal_left = left;
                        left_poly = next_poly;
                        left_index = i;
                    } else {
                        apex = portal_right;
                        let apex_index = right_index;
                        let flags = if right_poly.is_none() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if straight.append(apex, flags, right_poly) {
                            return Ok(straight.points);
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }
                i += 1;
            }
        }

        straight.append(closest_end, StraightPathFlags::END, None);
        Ok(straight.points)
    }

    /// Moves from `start_pos` towards `end_pos` while staying on the navmesh.
    ///
    /// Only polygons within the circle spanned by the two positions are searched. If the end
    /// lies outside the reachable surface, the closest point on a wall is returned.
    pub fn move_along_surface(
        &self,
        start: PolyRef,
        start_pos: Vec3A,
        end_pos: Vec3A,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<SurfaceMove, QueryError> {
        self.resolve(start)?;

        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_radius_sqr = (start_pos.distance(end_pos) * 0.5 + 0.001).powi(2);

        let mut parents: HashMap<PolyRef, Option<PolyRef>> = HashMap::from([(start, None)]);
        let mut queue = VecDeque::from([start]);
        let mut best_pos = start_pos;
        let mut best_distance = f32::MAX;
        let mut best_poly = start;

        while let Some(current) = queue.pop_front() {
            let (tile, i) = self.resolve(current)?;
            let vertices = tile.poly_vertices(i);
            if point_in_polygon(end_pos, &vertices) {
                best_poly = current;
                best_pos = end_pos;
                break;
            }

            let polygon = &tile.data().polygons[i];
            let count = vertices.len();
            for j in 0..count {
                let vj = vertices[j];
                let vi = vertices[(j + 1) % count];
                let neighbors = self.edge_neighbors(tile, i, j, polygon, filter);
                if neighbors.is_empty() {
                    let (distance, t) = distance_pt_seg_sqr_2d(end_pos, vj, vi);
                    if distance < best_distance {
                        best_pos = vj.lerp(vi, t);
                        best_distance = distance;
                        best_poly = current;
                    }
                    continue;
                }
                for neighbor in neighbors {
                    if parents.contains_key(&neighbor) {
                        continue;
                    }
                    if distance_pt_seg_sqr_2d(search_pos, vj, vi).0 > search_radius_sqr {
                        continue;
                    }
                    if queue.len() < MAX_STACK && parents.len() < self.max_nodes {
                        parents.insert(neighbor, Some(current));
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        let mut visited = Vec::new();
        let mut current = Some(best_poly);
        while let Some(poly) = current {
            visited.push(poly);
            current = parents.get(&poly).copied().flatten();
        }
        visited.reverse();
        visited.truncate(max_visited.max(1));
        Ok(SurfaceMove {
            position: best_pos,
            visited,
        })
    }

    /// The polygons passing `filter` across edge `edge` of polygon `poly` of `tile`.
    fn edge_neighbors(
        &self,
        tile: &MeshTile,
        poly: usize,
        edge: usize,
        polygon: &TilePolygon,
        filter: &QueryFilter,
    ) -> Vec<PolyRef> {
        let neighbor = polygon.neighbors[edge];
        if neighbor & EXT_LINK != 0 {
            tile.links(poly)
                .iter()
                .filter(|link| link.edge as usize == edge)
                .map(|link| link.target)
                .filter(|&target| self.is_valid_poly_ref(target, filter))
                .collect()
        } else if neighbor != 0 {
            let target = self.store.poly_ref(tile, neighbor as usize - 1);
            if self.is_valid_poly_ref(target, filter) {
                vec![target]
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        }
    }

    /// Casts a ray along the surface from `start_pos` towards `end_pos`.
    ///
    /// The ray only follows the xz-plane. When it hits a wall, [`RaycastHit::t`] is the hit
    /// parameter along the segment and the normal points away from the wall.
    pub fn raycast(
        &self,
        start: PolyRef,
        start_pos: Vec3A,
        end_pos: Vec3A,
        filter: &QueryFilter,
    ) -> Result<RaycastHit, QueryError> {
        let mut hit = RaycastHit {
            t: 0.0,
            normal: Vec3A::ZERO,
            path: Vec::new(),
        };
        let mut current = start;
        loop {
            let (tile, i) = self.resolve(current)?;
            let vertices = tile.poly_vertices(i);
            let Some(intersection) = intersect_segment_poly_2d(start_pos, end_pos, &vertices)
            else {
                // The ray does not touch the polygon, keep the last hit.
                return Ok(hit);
            };
            hit.t = hit.t.max(intersection.tmax);
            hit.path.push(current);

            let Some(seg_max) = intersection.seg_max else {
                hit.t = f32::MAX;
                return Ok(hit);
            };

            let mut next = None;
            for link in tile.links(i) {
                if link.edge as usize != seg_max || !self.is_valid_poly_ref(link.target, filter) {
                    continue;
                }
                if !link.is_partial() {
                    next = Some(link.target);
                    break;
                }
                // Check that the intersection lies inside the shared part of the edge.
                let left = vertices[link.edge as usize];
                let right = vertices[(link.edge as usize + 1) % vertices.len()];
                let s = 1.0 / 255.0;
                let (from, to, at) = if link.side == 0 || link.side == 4 {
                    (left.z, right.z, start_pos.z + (end_pos.z - start_pos.z) * intersection.tmax)
                } else {
                    (left.x, right.x, start_pos.x + (end_pos.x - start_pos.x) * intersection.tmax)
                };
                let a = from + (to - from) * (link.bmin as f32 * s);
                let b = from + (to - from) * (link.bmax as f32 * s);
                if (a.min(b)..=a.max(b)).contains(&at) {
                    next = Some(link.target);
                    break;
                }
            }

            let Some(next) = next else {
                let va = vertices[seg_max];
                let vb = vertices[(seg_max + 1) % vertices.len()];
                hit.normal = Vec3A::new(vb.z - va.z, 0.0, -(vb.x - va.x)).normalize_or_zero();
                return Ok(hit);
            };
            current = next;
        }
    }

    /// Collects the polygons around `start` that touch the circle at `center`, without
    /// overlapping each other on the xz-plane.
    ///
    /// Returns each polygon with the polygon it was reached from.
    pub fn find_local_neighbourhood(
        &self,
        start: PolyRef,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<Vec<(PolyRef, Option<PolyRef>)>, QueryError> {
        self.resolve(start)?;
        let radius_sqr = radius * radius;
        let mut result = vec![(start, None)];
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let (tile, i) = self.resolve(current)?;
            for link in tile.links(i) {
                let neighbor = link.target;
                if visited.contains(&neighbor) || !self.is_valid_poly_ref(neighbor, filter) {
                    continue;
                }
                let Ok((va, vb)) = self.portal_points(current, neighbor) else {
                    continue;
                };
                // Skip polygons the circle does not reach.
                if distance_pt_seg_sqr_2d(center, va, vb).0 > radius_sqr {
                    continue;
                }
                // Mark before the overlap test so that the polygon is not tested again.
                visited.insert(neighbor);

                let (neighbor_tile, neighbor_index) = self.resolve(neighbor)?;
                let neighbor_vertices = neighbor_tile.poly_vertices(neighbor_index);
                let overlaps = result.iter().any(|&(other, _)| {
                    let Some((other_tile, other_index)) = self.store.tile_and_poly(other) else {
                        return false;
                    };
                    // Connected polygons do not overlap.
                    if other_tile
                        .links(other_index)
                        .iter()
                        .any(|link| link.target == neighbor)
                    {
                        return false;
                    }
                    overlap_poly_poly_2d(
                        &neighbor_vertices,
                        &other_tile.poly_vertices(other_index),
                    )
                });
                if overlaps {
                    continue;
                }

                if result.len() < max_result {
                    result.push((neighbor, Some(current)));
                }
                if queue.len() < MAX_STACK {
                    queue.push_back(neighbor);
                }
            }
        }
        Ok(result)
    }

    /// The wall segments of `poly`: edges without a neighbor passing `filter`, and the parts of
    /// tile border edges not covered by links.
    pub fn poly_wall_segments(
        &self,
        poly: PolyRef,
        filter: &QueryFilter,
    ) -> Result<Vec<[Vec3A; 2]>, QueryError> {
        let (tile, i) = self.resolve(poly)?;
        let polygon = &tile.data().polygons[i];
        let vertices = tile.poly_vertices(i);
        let count = vertices.len();
        let mut segments = Vec::new();

        for j in 0..count {
            let vj = vertices[j];
            let vi = vertices[(j + 1) % count];
            if polygon.neighbors[j] & EXT_LINK == 0 {
                let neighbor = polygon.neighbors[j];
                let passable = neighbor != 0
                    && self
                        .is_valid_poly_ref(self.store.poly_ref(tile, neighbor as usize - 1), filter);
                if !passable {
                    segments.push([vj, vi]);
                }
                continue;
            }

            // Tile border: walls are the gaps between the linked intervals.
            let mut intervals: Vec<(i32, i32)> = tile
                .links(i)
                .iter()
                .filter(|link| link.edge as usize == j && self.is_valid_poly_ref(link.target, filter))
                .map(|link| (link.bmin as i32, link.bmax as i32))
                .collect();
            intervals.push((-1, 0));
            intervals.push((255, 256));
            intervals.sort_by_key(|&(tmin, _)| tmin);
            for pair in intervals.windows(2) {
                let (imin, imax) = (pair[0].1, pair[1].0);
                if imin < imax {
                    let tmin = imin as f32 / 255.0;
                    let tmax = imax as f32 / 255.0;
                    segments.push([vj.lerp(vi, tmin), vj.lerp(vi, tmax)]);
                }
            }
        }
        Ok(segments)
    }
}

struct StraightPath {
    points: Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPath {
    /// Appends a corner, merging it into the previous one when they coincide.
    /// Returns `true` if the path is full or complete.
    fn append(&mut self, position: Vec3A, flags: StraightPathFlags, poly: Option<PolyRef>) -> bool {
        if let Some(last) = self.points.last_mut()
            && v_equal(last.position, position)
        {
            last.flags = flags;
            last.poly = poly;
        } else {
            self.points.push(StraightPathPoint {
                position,
                flags,
                poly,
            });
        }
        self.points.len() >= self.max_points || flags.contains(StraightPathFlags::END)
    }
}

/// The closest point to `position` on the edges of the detail triangles of polygon `poly`.
/// Falls back to the polygon edges when no detail edge qualifies.
fn closest_point_on_detail_edges(
    tile: &MeshTile,
    poly: usize,
    position: Vec3A,
    only_boundary: bool,
) -> Vec3A {
    let mut best = ClosestOnEdges::new(position);
    if let Some((detail, triangles)) = tile.data().detail(poly) {
        for triangle in triangles {
            for k in 0..3 {
                if only_boundary && (triangle.flags >> (k * 2)) & 0x3 == 0 {
                    continue;
                }
                best.consider(
                    detail[triangle.indices[k] as usize],
                    detail[triangle.indices[(k + 1) % 3] as usize],
                );
            }
        }
    }
    if best.distance == f32::MAX {
        let vertices = tile.poly_vertices(poly);
        for j in 0..vertices.len() {
            best.consider(vertices[j], vertices[(j + 1) % vertices.len()]);
        }
    }
    best.point
}

struct ClosestOnEdges {
    position: Vec3A,
    distance: f32,
    point: Vec3A,
}

impl ClosestOnEdges {
    fn new(position: Vec3A) -> Self {
        Self {
            position,
            distance: f32::MAX,
            point: position,
        }
    }

    fn consider(&mut self, a: Vec3A, b: Vec3A) {
        let (distance, t) = distance_pt_seg_sqr_2d(self.position, a, b);
        if distance < self.distance {
            self.distance = distance;
            self.point = a.lerp(b, t);
        }
    }
}
