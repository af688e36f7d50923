//! Geometry helpers working on the xz-plane.

use glam::Vec3A;

/// Squared tolerance below which two points are considered equal.
const EQUAL_THRESHOLD: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Twice the signed area of the triangle `abc` on the xz-plane.
#[inline]
pub fn tri_area_2d(a: Vec3A, b: Vec3A, c: Vec3A) -> f32 {
    let ab = b - a;
    let ac = c - a;
    ac.x * ab.z - ab.x * ac.z
}

/// Returns `true` if the points are within a tiny distance of each other.
#[inline]
pub fn v_equal(a: Vec3A, b: Vec3A) -> bool {
    a.distance_squared(b) < EQUAL_THRESHOLD
}

/// The perp-dot product of `u` and `v` on the xz-plane.
#[inline]
pub fn perp_2d(u: Vec3A, v: Vec3A) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Squared distance on the xz-plane from `pt` to the segment `p`-`q`, and the parameter of the
/// closest point along the segment.
pub fn distance_pt_seg_sqr_2d(pt: Vec3A, p: Vec3A, q: Vec3A) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    (dx * dx + dz * dz, t)
}

/// The height of the triangle `abc` at `p`, if `p` lies inside it on the xz-plane.
pub fn closest_height_point_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
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

/// Even-odd point in polygon test on the xz-plane.
pub fn point_in_polygon(pt: Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if (vi.z > pt.z) != (vj.z > pt.z)
            && pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Like [`point_in_polygon`], but also returns the squared distance to every edge and the
/// parameter of the closest point on it. Edge `j` runs from vertex `j` to vertex `j + 1`.
pub fn distance_pt_poly_edges_sqr(pt: Vec3A, vertices: &[Vec3A]) -> (bool, Vec<(f32, f32)>) {
    let mut edges = vec![(0.0, 0.0); vertices.len()];
    let mut j = vertices.len().wrapping_sub(1);
    for i in 0..vertices.len() {
        edges[j] = distance_pt_seg_sqr_2d(pt, vertices[j], vertices[i]);
        j = i;
    }
    (point_in_polygon(pt, vertices), edges)
}

/// The result of clipping a segment against a convex polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyIntersection {
    /// Parameter where the segment enters the polygon.
    pub tmin: f32,
    /// Parameter where the segment leaves the polygon.
    pub tmax: f32,
    /// The edge the segment enters through, if it starts outside.
    pub seg_min: Option<usize>,
    /// The edge the segment leaves through, if it ends outside.
    pub seg_max: Option<usize>,
}

/// Clips the segment `p0`-`p1` against a convex polygon on the xz-plane.
pub fn intersect_segment_poly_2d(
    p0: Vec3A,
    p1: Vec3A,
    vertices: &[Vec3A],
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 1e-8;
    let mut result = SegmentPolyIntersection {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = p1 - p0;

    let mut j = vertices.len().wrapping_sub(1);
    for i in 0..vertices.len() {
        let edge = vertices[i] - vertices[j];
        let diff = p0 - vertices[j];
        let n = perp_2d(edge, diff);
        let d = perp_2d(dir, edge);
        if d.abs() < EPS {
            // The segment is nearly parallel to this edge.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            // Entering across this edge.
            if t > result.tmin {
                result.tmin = t;
                result.seg_min = Some(j);
                if result.tmin > result.tmax {
                    return None;
                }
            }
        } else if t < result.tmax {
            // Leaving across this edge.
            result.tmax = t;
            result.seg_max = Some(j);
            if result.tmax < result.tmin {
                return None;
            }
        }
        j = i;
    }
    Some(result)
}

fn project_poly(axis: Vec3A, vertices: &[Vec3A]) -> (f32, f32) {
    vertices
        .iter()
        .map(|v| axis.x * v.x + axis.z * v.z)
        .fold((f32::MAX, f32::MIN), |(min, max), d| (min.min(d), max.max(d)))
}

fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !(amin + eps > bmax || amax - eps < bmin)
}

/// Separating axis test between two convex polygons on the xz-plane.
/// Polygons that only touch do not overlap.
pub fn overlap_poly_poly_2d(a: &[Vec3A], b: &[Vec3A]) -> bool {
    const EPS: f32 = 1e-4;
    for polygon in [a, b] {
        let mut j = polygon.len().wrapping_sub(1);
        for i in 0..polygon.len() {
            let va = polygon[j];
            let vb = polygon[i];
            let normal = Vec3A::new(vb.z - va.z, 0.0, -(vb.x - va.x));
            let (amin, amax) = project_poly(normal, a);
            let (bmin, bmax) = project_poly(normal, b);
            if !overlap_range(amin, amax, bmin, bmax, EPS) {
                return false;
            }
            j = i;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square(min: f32, max: f32) -> Vec<Vec3A> {
        vec![
            Vec3A::new(min, 0.0, min),
            Vec3A::new(min, 0.0, max),
            Vec3A::new(max, 0.0, max),
            Vec3A::new(max, 0.0, min),
        ]
    }

    #[test]
    fn point_in_square() {
        let square = square(0.0, 2.0);
        assert!(point_in_polygon(Vec3A::new(1.0, 5.0, 1.0), &square));
        assert!(!point_in_polygon(Vec3A::new(3.0, 0.0, 1.0), &square));
    }

    #[test]
    fn segment_distance_clamps_to_end_points() {
        let (d, t) = distance_pt_seg_sqr_2d(
            Vec3A::new(-1.0, 0.0, 1.0),
            Vec3A::ZERO,
            Vec3A::new(2.0, 0.0, 0.0),
        );
        assert_relative_eq!(d, 2.0);
        assert_relative_eq!(t, 0.0);
    }

    #[test]
    fn height_inside_sloped_triangle() {
        let a = Vec3A::new(0.0, 0.0, 0.0);
        let b = Vec3A::new(0.0, 0.0, 2.0);
        let c = Vec3A::new(2.0, 2.0, 0.0);
        let h = closest_height_point_triangle(Vec3A::new(1.0, 0.0, 0.5), a, b, c).unwrap();
        assert_relative_eq!(h, 1.0, epsilon = 1e-5);
        assert!(closest_height_point_triangle(Vec3A::new(3.0, 0.0, 3.0), a, b, c).is_none());
    }

    #[test]
    fn segment_leaving_square_reports_exit_edge() {
        let square = square(0.0, 2.0);
        let hit = intersect_segment_poly_2d(
            Vec3A::new(1.0, 0.0, 1.0),
            Vec3A::new(3.0, 0.0, 1.0),
            &square,
        )
        .unwrap();
        assert_relative_eq!(hit.tmax, 0.5);
        // Edge 2 runs along x = 2.
        assert_eq!(hit.seg_max, Some(2));
        assert_eq!(hit.seg_min, None);
    }

    #[test]
    fn touching_polygons_do_not_overlap() {
        assert!(!overlap_poly_poly_2d(&square(0.0, 1.0), &square(1.0, 2.0)));
        assert!(overlap_poly_poly_2d(&square(0.0, 1.0), &square(0.5, 2.0)));
    }

    #[test]
    fn tri_area_sign_follows_winding() {
        let a = Vec3A::ZERO;
        let b = Vec3A::new(0.0, 0.0, 1.0);
        let c = Vec3A::new(1.0, 0.0, 0.0);
        assert!(tri_area_2d(a, b, c) > 0.0);
        assert!(tri_area_2d(a, c, b) < 0.0);
    }
}
