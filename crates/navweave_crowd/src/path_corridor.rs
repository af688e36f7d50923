//! The polygon corridor an agent follows towards its target.

use glam::Vec3A;
use navweave_tiles::{NavmeshQuery, PolyRef, QueryError, QueryFilter, StraightPathPoint};

/// Corners closer than this to the agent are skipped.
pub const MIN_TARGET_DIST: f32 = 0.01;

/// Maximum number of polygons visited when moving along the surface.
const MAX_VISITED: usize = 16;

/// Search budget of a topology optimization.
const MAX_TOPOLOGY_NODES: usize = 32;

/// A dynamic polygon corridor from the agent's position to its target.
///
/// The first polygon contains the position and the last one contains the target. The corridor
/// is adjusted as the agent and the target move, without replanning the whole path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathCorridor {
    position: Vec3A,
    target: Vec3A,
    path: Vec<PolyRef>,
    max_path: usize,
}

impl PathCorridor {
    /// Creates an empty corridor holding at most `max_path` polygons.
    pub fn new(max_path: usize) -> Self {
        Self {
            position: Vec3A::ZERO,
            target: Vec3A::ZERO,
            path: Vec::new(),
            max_path: max_path.max(1),
        }
    }

    /// Resets the corridor to a single polygon, with the position and target at `position`.
    pub fn reset(&mut self, poly: Option<PolyRef>, position: Vec3A) {
        self.position = position;
        self.target = position;
        self.path.clear();
        self.path.extend(poly);
    }

    /// Replaces the corridor.
    pub fn set_corridor(&mut self, target: Vec3A, path: &[PolyRef]) {
        self.target = target;
        self.path.clear();
        self.path
            .extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    /// The current position.
    #[inline]
    pub fn position(&self) -> Vec3A {
        self.position
    }

    /// The current target.
    #[inline]
    pub fn target(&self) -> Vec3A {
        self.target
    }

    /// The polygons of the corridor.
    #[inline]
    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    /// The polygon containing the position.
    #[inline]
    pub fn first_poly(&self) -> Option<PolyRef> {
        self.path.first().copied()
    }

    /// The polygon containing the target.
    #[inline]
    pub fn last_poly(&self) -> Option<PolyRef> {
        self.path.last().copied()
    }

    /// Finds up to `max_corners` corners of the straight path along the corridor.
    ///
    /// Corners closer than [`MIN_TARGET_DIST`] to the position are skipped.
    pub fn find_corners(
        &self,
        max_corners: usize,
        query: &NavmeshQuery,
    ) -> Result<Vec<StraightPathPoint>, QueryError> {
        if self.path.is_empty() {
            return Ok(Vec::new());
        }
        let mut corners =
            query.find_straight_path(self.position, self.target, &self.path, max_corners)?;
        let skip = corners
            .iter()
            .take_while(|corner| {
                distance_2d_squared(corner.position, self.position)
                    <= MIN_TARGET_DIST * MIN_TARGET_DIST
            })
            .count();
        corners.drain(..skip);
        Ok(corners)
    }

    /// Shortcuts the start of the corridor if `next` is directly visible.
    ///
    /// The ray is extended towards `next` up to `optimization_range` so that open fields
    /// spanning several tiles collapse into a straight line.
    pub fn optimize_path_visibility(
        &mut self,
        next: Vec3A,
        optimization_range: f32,
        query: &NavmeshQuery,
        filter: &QueryFilter,
    ) {
        let Some(first) = self.first_poly() else {
            return;
        };
        let distance = distance_2d(self.position, next);
        // Too close to optimize.
        if distance < 0.01 {
            return;
        }
        let range = (distance + 0.01).min(optimization_range);
        let goal = self.position + (next - self.position) * (range / distance);

        let Ok(hit) = query.raycast(first, self.position, goal, filter) else {
            return;
        };
        if hit.path.len() > 1 && hit.t > 0.99 {
            merge_corridor_start_shortcut(&mut self.path, &hit.path, self.max_path);
        }
    }

    /// Searches a few polygons ahead for a shorter way to the corridor's end and splices it in.
    ///
    /// Returns `true` if the corridor was changed.
    pub fn optimize_path_topology(&mut self, query: &NavmeshQuery, filter: &QueryFilter) -> bool {
        if self.path.len() < 3 {
            return false;
        }
        let (Some(first), Some(last)) = (self.first_poly(), self.last_poly()) else {
            return false;
        };
        let Ok(result) = query.with_max_nodes(MAX_TOPOLOGY_NODES).find_path(
            first,
            last,
            self.position,
            self.target,
            filter,
            MAX_TOPOLOGY_NODES,
        ) else {
            return false;
        };
        if result.polygons.is_empty() {
            return false;
        }
        let before = self.path.clone();
        merge_corridor_start_shortcut(&mut self.path, &result.polygons, self.max_path);
        before != self.path
    }

    /// Moves the position towards `target_position` along the navmesh surface.
    ///
    /// The start of the corridor is adjusted to the polygons visited and the height of the new
    /// position is snapped to the surface.
    pub fn move_position(
        &mut self,
        target_position: Vec3A,
        query: &NavmeshQuery,
        filter: &QueryFilter,
    ) -> Result<(), QueryError> {
        let Some(first) = self.first_poly() else {
            return Ok(());
        };
        let moved =
            query.move_along_surface(first, self.position, target_position, filter, MAX_VISITED)?;
        merge_corridor_start_moved(&mut self.path, &moved.visited, self.max_path);

        let mut position = moved.position;
        position.y = self.position.y;
        if let Some(first) = self.first_poly()
            && let Ok(Some(height)) = query.poly_height(first, position)
        {
            position.y = height;
        }
        self.position = position;
        Ok(())
    }

    /// Moves the target towards `target_position` along the navmesh surface.
    pub fn move_target_position(
        &mut self,
        target_position: Vec3A,
        query: &NavmeshQuery,
        filter: &QueryFilter,
    ) -> Result<(), QueryError> {
        let Some(last) = self.last_poly() else {
            return Ok(());
        };
        let moved =
            query.move_along_surface(last, self.target, target_position, filter, MAX_VISITED)?;
        merge_corridor_end_moved(&mut self.path, &moved.visited, self.max_path);
        self.target = moved.position;
        Ok(())
    }

    /// Replaces the start of the corridor with a known good polygon and position.
    ///
    /// The rest of the corridor is kept so that a replan can reuse it.
    pub fn fix_path_start(&mut self, safe_poly: PolyRef, safe_position: Vec3A) {
        self.position = safe_position;
        match self.path.first_mut() {
            Some(first) => *first = safe_poly,
            None => self.path.push(safe_poly),
        }
    }

    /// Cuts the corridor at its first invalid polygon.
    ///
    /// If the first polygon is invalid, the corridor restarts at the safe polygon and position.
    /// The target is clamped to the last remaining polygon.
    pub fn trim_invalid_path(
        &mut self,
        safe_poly: PolyRef,
        safe_position: Vec3A,
        query: &NavmeshQuery,
        filter: &QueryFilter,
    ) {
        let valid = self
            .path
            .iter()
            .take_while(|&&poly| query.is_valid_poly_ref(poly, filter))
            .count();
        if valid == self.path.len() && valid > 0 {
            return;
        }
        if valid == 0 {
            self.position = safe_position;
            self.path.clear();
            self.path.push(safe_poly);
        } else {
            self.path.truncate(valid);
        }
        if let Some(last) = self.last_poly()
            && let Ok(target) = query.closest_point_on_poly_boundary(last, self.target)
        {
            self.target = target;
        }
    }

    /// Returns `true` if the first `max_look_ahead` polygons are still valid.
    pub fn is_valid(&self, max_look_ahead: usize, query: &NavmeshQuery, filter: &QueryFilter) -> bool {
        self.path
            .iter()
            .take(max_look_ahead)
            .all(|&poly| query.is_valid_poly_ref(poly, filter))
    }
}

/// Replaces the start of `path` up to the furthest polygon shared with `visited` by the visited
/// polygons, in reverse so that the path starts at the last visited polygon.
pub(crate) fn merge_corridor_start_moved(
    path: &mut Vec<PolyRef>,
    visited: &[PolyRef],
    max_path: usize,
) {
    let Some((furthest_path, furthest_visited)) = path
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, poly)| visited.iter().position(|v| v == poly).map(|j| (i, j)))
    else {
        return;
    };
    let mut merged: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    merged.extend_from_slice(&path[furthest_path + 1..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Replaces the end of `path` after the first polygon shared with `visited` by the remaining
/// visited polygons.
pub(crate) fn merge_corridor_end_moved(
    path: &mut Vec<PolyRef>,
    visited: &[PolyRef],
    max_path: usize,
) {
    let Some((furthest_path, furthest_visited)) = path
        .iter()
        .enumerate()
        .find_map(|(i, poly)| visited.iter().position(|v| v == poly).map(|j| (i, j)))
    else {
        return;
    };
    path.truncate(furthest_path + 1);
    let room = max_path.saturating_sub(path.len());
    path.extend(visited[furthest_visited + 1..].iter().take(room));
}

/// Replaces the start of `path` up to the furthest polygon shared with `shortcut` by the
/// shortcut.
pub(crate) fn merge_corridor_start_shortcut(
    path: &mut Vec<PolyRef>,
    shortcut: &[PolyRef],
    max_path: usize,
) {
    let Some((furthest_path, furthest_shortcut)) = path
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, poly)| shortcut.iter().position(|v| v == poly).map(|j| (i, j)))
    else {
        return;
    };
    if furthest_shortcut == 0 {
        return;
    }
    let mut merged = shortcut[..furthest_shortcut].to_vec();
    merged.extend_from_slice(&path[furthest_path..]);
    merged.truncate(max_path);
    *path = merged;
}

#[inline]
pub(crate) fn distance_2d_squared(a: Vec3A, b: Vec3A) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

#[inline]
pub(crate) fn distance_2d(a: Vec3A, b: Vec3A) -> f32 {
    distance_2d_squared(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&id| PolyRef(id)).collect()
    }

    #[test]
    fn start_moved_forward_drops_passed_polygons() {
        let mut path = refs(&[1, 2, 3, 4]);
        merge_corridor_start_moved(&mut path, &refs(&[1, 2]), 16);
        assert_eq!(path, refs(&[2, 3, 4]));
    }

    #[test]
    fn start_moved_off_corridor_leads_back() {
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_moved(&mut path, &refs(&[1, 9]), 16);
        assert_eq!(path, refs(&[9, 1, 2, 3]));
    }

    #[test]
    fn end_moved_extends_the_path() {
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, &refs(&[3, 7, 8]), 16);
        assert_eq!(path, refs(&[1, 2, 3, 7, 8]));
        merge_corridor_end_moved(&mut path, &refs(&[5, 6]), 16);
        assert_eq!(path, refs(&[1, 2, 3, 7, 8]));
    }

    #[test]
    fn shortcut_replaces_detours() {
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_start_shortcut(&mut path, &refs(&[1, 6, 4]), 16);
        assert_eq!(path, refs(&[1, 6, 4, 5]));
    }

    #[test]
    fn reset_keeps_a_single_polygon() {
        let mut corridor = PathCorridor::new(8);
        corridor.set_corridor(Vec3A::X, &refs(&[1, 2, 3]));
        corridor.reset(Some(PolyRef(2)), Vec3A::Z);
        assert_eq!(corridor.path(), &refs(&[2])[..]);
        assert_eq!(corridor.target(), Vec3A::Z);
        corridor.reset(None, Vec3A::Z);
        assert!(corridor.first_poly().is_none());
    }
}
