//! The wall segments near an agent, refreshed as it moves.

use glam::Vec3A;
use navweave_tiles::{NavmeshQuery, PolyRef, QueryFilter, geometry::distance_pt_seg_sqr_2d};

const MAX_LOCAL_SEGMENTS: usize = 8;
const MAX_LOCAL_POLYS: usize = 16;

/// A wall segment near an agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundarySegment {
    /// The end points of the wall.
    pub segment: [Vec3A; 2],
    /// Squared distance from the boundary center on the xz-plane.
    pub distance_squared: f32,
}

/// The closest navmesh walls around an agent, used for obstacle avoidance.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBoundary {
    center: Vec3A,
    segments: Vec<BoundarySegment>,
    polys: Vec<PolyRef>,
}

impl Default for LocalBoundary {
    fn default() -> Self {
        Self {
            center: Vec3A::splat(f32::MAX),
            segments: Vec::new(),
            polys: Vec::new(),
        }
    }
}

impl LocalBoundary {
    /// Forgets every segment, forcing the next update.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The position the boundary was collected around.
    #[inline]
    pub fn center(&self) -> Vec3A {
        self.center
    }

    /// The wall segments, closest first.
    #[inline]
    pub fn segments(&self) -> &[BoundarySegment] {
        &self.segments
    }

    /// Collects the walls of the polygons within `collision_query_range` of `position`.
    pub fn update(
        &mut self,
        poly: Option<PolyRef>,
        position: Vec3A,
        collision_query_range: f32,
        query: &NavmeshQuery,
        filter: &QueryFilter,
    ) {
        let Some(poly) = poly else {
            self.reset();
            return;
        };
        self.center = position;
        self.segments.clear();
        self.polys = query
            .find_local_neighbourhood(poly, position, collision_query_range, filter, MAX_LOCAL_POLYS)
            .map(|polys| polys.into_iter().map(|(poly, _)| poly).collect())
            .unwrap_or_default();

        let range_squared = collision_query_range * collision_query_range;
        for &poly in &self.polys {
            let Ok(walls) = query.poly_wall_segments(poly, filter) else {
                continue;
            };
            for segment in walls {
                let (distance_squared, _) = distance_pt_seg_sqr_2d(position, segment[0], segment[1]);
                if distance_squared > range_squared {
                    continue;
                }
                insert_segment(
                    &mut self.segments,
                    BoundarySegment {
                        segment,
                        distance_squared,
                    },
                );
            }
        }
    }

    /// Returns `true` if every polygon the boundary was collected from is still valid.
    pub fn is_valid(&self, query: &NavmeshQuery, filter: &QueryFilter) -> bool {
        !self.polys.is_empty()
            && self
                .polys
                .iter()
                .all(|&poly| query.is_valid_poly_ref(poly, filter))
    }
}

/// Inserts `segment` sorted by distance, keeping only the closest ones.
fn insert_segment(segments: &mut Vec<BoundarySegment>, segment: BoundarySegment) {
    let index = segments.partition_point(|s| s.distance_squared < segment.distance_squared);
    if index >= MAX_LOCAL_SEGMENTS {
        return;
    }
    segments.insert(index, segment);
    segments.truncate(MAX_LOCAL_SEGMENTS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_closest_segments_are_kept() {
        let mut segments = Vec::new();
        for i in (0..12).rev() {
            insert_segment(
                &mut segments,
                BoundarySegment {
                    segment: [Vec3A::ZERO, Vec3A::X],
                    distance_squared: i as f32,
                },
            );
        }
        assert_eq!(segments.len(), MAX_LOCAL_SEGMENTS);
        let distances: Vec<f32> = segments.iter().map(|s| s.distance_squared).collect();
        assert_eq!(distances, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn reset_boundary_is_invalid() {
        let boundary = LocalBoundary::default();
        assert!(boundary.segments().is_empty());
        assert_eq!(boundary.center(), Vec3A::splat(f32::MAX));
    }
}
