use glam::{Affine3A, IVec2, UVec3, Vec3A};

/// An axis-aligned bounding box in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner.
    pub min: Vec3A,
    /// The maximum corner.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a box from its center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the bounds of a point cloud. Returns `None` for an empty slice.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// Inclusive overlap test. Touching boxes overlap, so flat geometry lying exactly on a
    /// tile plane is not lost.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Returns the smallest box containing both boxes.
    #[inline]
    pub fn union(&self, other: &Aabb3d) -> Aabb3d {
        Aabb3d {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the extents of the box.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns the world-space bounds of this box after applying `transform`.
    pub fn transformed_by(&self, transform: &Affine3A) -> Aabb3d {
        let corners = [
            Vec3A::new(self.min.x, self.min.y, self.min.z),
            Vec3A::new(self.max.x, self.min.y, self.min.z),
            Vec3A::new(self.min.x, self.max.y, self.min.z),
            Vec3A::new(self.max.x, self.max.y, self.min.z),
            Vec3A::new(self.min.x, self.min.y, self.max.z),
            Vec3A::new(self.max.x, self.min.y, self.max.z),
            Vec3A::new(self.min.x, self.max.y, self.max.z),
            Vec3A::new(self.max.x, self.max.y, self.max.z),
        ]
        .map(|corner| transform.transform_point3a(corner));
        // A fixed array of 8 corners is never empty.
        let (min, max) = corners[1..]
            .iter()
            .fold((corners[0], corners[0]), |(min, max), v| {
                (min.min(*v), max.max(*v))
            });
        Aabb3d { min, max }
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Inverse of [`dir_offset_x`] and [`dir_offset_z`] for unit offsets.
#[inline]
pub(crate) fn dir_for_offset(x: i32, z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, 0, 2, 1];
    DIRS[(((z + 1) << 1) + x) as usize]
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance between `pt` and segment `p`-`q` on the xz-plane.
pub(crate) fn distance_squared_pt_seg_2d(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
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
    dx * dx + dz * dz
}

/// Squared distance between `pt` and segment `p`-`q` in 3D.
pub(crate) fn distance_squared_pt_seg(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Integer 2D predicates on the xz-plane used by contour and polygon triangulation.
/// `x` holds the world x-axis and `y` holds the world z-axis.
pub(crate) mod grid2d {
    use super::IVec2;

    #[inline]
    pub(crate) fn area2(a: IVec2, b: IVec2, c: IVec2) -> i64 {
        (b.x as i64 - a.x as i64) * (c.y as i64 - a.y as i64)
            - (c.x as i64 - a.x as i64) * (b.y as i64 - a.y as i64)
    }

    /// True iff `c` is strictly to the left of the directed line through `a` and `b`.
    #[inline]
    pub(crate) fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
        area2(a, b, c) < 0
    }

    #[inline]
    pub(crate) fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
        area2(a, b, c) <= 0
    }

    #[inline]
    pub(crate) fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
        area2(a, b, c) == 0
    }

    /// True iff `ab` properly intersects `cd`: they share a point interior to both segments.
    pub(crate) fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
        if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
            return false;
        }
        (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
    }

    /// True iff `c` lies on the closed segment `ab`.
    pub(crate) fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
        if !collinear(a, b, c) {
            return false;
        }
        if a.x != b.x {
            (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
        } else {
            (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
        }
    }

    /// True iff segments `ab` and `cd` intersect, properly or improperly.
    pub(crate) fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
        intersect_prop(a, b, c, d)
            || between(a, b, c)
            || between(a, b, d)
            || between(c, d, a)
            || between(c, d, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transformed_aabb_covers_rotated_box() {
        let aabb = Aabb3d::new(Vec3A::ZERO, [1.0, 1.0, 2.0]);
        let rotated = aabb.transformed_by(&Affine3A::from_rotation_y(std::f32::consts::FRAC_PI_2));
        approx::assert_relative_eq!(rotated.max.x, 2.0, epsilon = 1e-5);
        approx::assert_relative_eq!(rotated.max.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = Aabb3d {
            min: Vec3A::ZERO,
            max: Vec3A::new(1.0, 0.0, 1.0),
        };
        let b = Aabb3d {
            min: Vec3A::new(1.0, 0.0, 0.0),
            max: Vec3A::new(2.0, 1.0, 1.0),
        };
        assert!(a.intersects(&b));
        let c = Aabb3d {
            min: Vec3A::new(1.5, 0.0, 0.0),
            max: Vec3A::new(2.0, 1.0, 1.0),
        };
        assert!(!a.intersects(&c));
    }

    #[test]
    fn dir_for_offset_inverts_offsets() {
        for dir in 0..4 {
            assert_eq!(dir_for_offset(dir_offset_x(dir), dir_offset_z(dir)), dir);
        }
    }

    #[test]
    fn segments_crossing_intersect() {
        use grid2d::*;
        let a = IVec2::new(0, 0);
        let b = IVec2::new(4, 4);
        let c = IVec2::new(0, 4);
        let d = IVec2::new(4, 0);
        assert!(intersect_prop(a, b, c, d));
        assert!(intersect(a, b, IVec2::new(2, 2), IVec2::new(5, 1)));
        assert!(!intersect(a, IVec2::new(1, 1), c, d));
    }
}
