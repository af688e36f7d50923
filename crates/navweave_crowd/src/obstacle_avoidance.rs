//! Velocity selection that steers agents around each other and around walls.
//!
//! Candidate velocities are sampled in rings around a biased desired velocity and scored by how
//! far they deviate from the desired and current velocity, which side of the obstacles they pass
//! on, and how soon they would collide. The best sample is refined by sampling again around it
//! with a smaller radius.

use std::f32::consts::TAU;

use glam::Vec3A;
use navweave_tiles::geometry::distance_pt_seg_sqr_2d;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

const MAX_PATTERN_DIVS: u8 = 32;
const MAX_PATTERN_RINGS: u8 = 4;

/// Tuning of the velocity sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ObstacleAvoidanceParams {
    /// How much of the desired velocity the sampling pattern is centered on.
    pub vel_bias: f32,
    /// Penalty weight for deviating from the desired velocity.
    pub weight_des_vel: f32,
    /// Penalty weight for deviating from the current velocity.
    pub weight_cur_vel: f32,
    /// Penalty weight for passing obstacles on the wrong side.
    pub weight_side: f32,
    /// Penalty weight for an imminent collision.
    pub weight_toi: f32,
    /// Collisions further than this many seconds ahead are ignored.
    pub horiz_time: f32,
    /// Number of divisions per ring.
    pub adaptive_divs: u8,
    /// Number of rings.
    pub adaptive_rings: u8,
    /// Number of refinement passes.
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// A moving circular obstacle, usually another agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleCircle {
    /// Position.
    pub position: Vec3A,
    /// Current velocity.
    pub velocity: Vec3A,
    /// Desired velocity.
    pub desired_velocity: Vec3A,
    /// Radius.
    pub radius: f32,
    dp: Vec3A,
    np: Vec3A,
}

/// A static wall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleSegment {
    /// Start of the wall.
    pub p: Vec3A,
    /// End of the wall.
    pub q: Vec3A,
    touch: bool,
}

/// Collects the obstacles around an agent and samples a safe velocity among them.
#[derive(Debug, Clone, Default)]
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    inv_horiz_time: f32,
    inv_vmax: f32,
    circles: Vec<ObstacleCircle>,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every obstacle.
    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Adds a moving circular obstacle.
    pub fn add_circle(
        &mut self,
        position: Vec3A,
        radius: f32,
        velocity: Vec3A,
        desired_velocity: Vec3A,
    ) {
        self.circles.push(ObstacleCircle {
            position,
            velocity,
            desired_velocity,
            radius,
            dp: Vec3A::ZERO,
            np: Vec3A::ZERO,
        });
    }

    /// Adds a wall from `p` to `q`.
    pub fn add_segment(&mut self, p: Vec3A, q: Vec3A) {
        self.segments.push(ObstacleSegment { p, q, touch: false });
    }

    /// The circular obstacles added since the last reset.
    #[inline]
    pub fn circles(&self) -> &[ObstacleCircle] {
        &self.circles
    }

    /// The walls added since the last reset.
    #[inline]
    pub fn segments(&self) -> &[ObstacleSegment] {
        &self.segments
    }

    fn prepare(&mut self, position: Vec3A, desired_velocity: Vec3A) {
        for circle in &mut self.circles {
            circle.dp = normalize_2d(circle.position - position);
            let dv = circle.desired_velocity - desired_velocity;
            // Pick the side to pass on from the relative desired velocity.
            let area = dv.x * circle.dp.z - circle.dp.x * dv.z;
            circle.np = if area < 0.01 {
                Vec3A::new(-circle.dp.z, 0.0, circle.dp.x)
            } else {
                Vec3A::new(circle.dp.z, 0.0, -circle.dp.x)
            };
        }
        for segment in &mut self.segments {
            let (distance_squared, _) = distance_pt_seg_sqr_2d(position, segment.p, segment.q);
            segment.touch = distance_squared < 0.01 * 0.01;
        }
    }

    /// Samples velocities around the desired velocity and returns the one with the lowest
    /// penalty, together with the number of samples taken.
    pub fn sample_velocity_adaptive(
        &mut self,
        position: Vec3A,
        radius: f32,
        max_speed: f32,
        velocity: Vec3A,
        desired_velocity: Vec3A,
        params: &ObstacleAvoidanceParams,
    ) -> (Vec3A, usize) {
        self.prepare(position, desired_velocity);
        self.params = *params;
        self.inv_horiz_time = 1.0 / params.horiz_time.max(f32::EPSILON);
        self.inv_vmax = if max_speed > 0.0 {
            1.0 / max_speed
        } else {
            f32::MAX
        };

        let pattern = sample_pattern(desired_velocity, params);

        let mut radius_of_pattern = max_speed * (1.0 - params.vel_bias);
        let mut result = Vec3A::new(
            desired_velocity.x * params.vel_bias,
            0.0,
            desired_velocity.z * params.vel_bias,
        );
        let mut sample_count = 0;
        let max_speed_squared = (max_speed + 0.001) * (max_speed + 0.001);

        for _ in 0..params.adaptive_depth.clamp(1, 8) {
            let mut min_penalty = f32::MAX;
            let mut best = Vec3A::ZERO;
            for offset in &pattern {
                let candidate = Vec3A::new(
                    result.x + offset.x * radius_of_pattern,
                    0.0,
                    result.z + offset.z * radius_of_pattern,
                );
                if candidate.x * candidate.x + candidate.z * candidate.z > max_speed_squared {
                    continue;
                }
                let penalty =
                    self.process_sample(candidate, position, radius, velocity, desired_velocity, min_penalty);
                sample_count += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    best = candidate;
                }
            }
            result = best;
            radius_of_pattern *= 0.5;
        }
        (result, sample_count)
    }

    fn process_sample(
        &self,
        candidate: Vec3A,
        position: Vec3A,
        radius: f32,
        velocity: Vec3A,
        desired_velocity: Vec3A,
        min_penalty: f32,
    ) -> f32 {
        let params = &self.params;
        let vpen = params.weight_des_vel * distance_2d(candidate, desired_velocity) * self.inv_vmax;
        let vcpen = params.weight_cur_vel * distance_2d(candidate, velocity) * self.inv_vmax;

        // Samples that cannot beat the best one so far are rejected as soon as a collision
        // closer than this is found.
        let remaining = min_penalty - vpen - vcpen;
        let threshold = (params.weight_toi / remaining - 0.1) * params.horiz_time;
        if threshold - params.horiz_time > -f32::EPSILON {
            return min_penalty;
        }

        let mut tmin = params.horiz_time;
        let mut side = 0.0;
        let mut side_count = 0;

        for circle in &self.circles {
            let relative = candidate * 2.0 - velocity - circle.velocity;
            side += (dot_2d(circle.dp, relative) * 0.5 + 0.5)
                .min(dot_2d(circle.np, relative) * 2.0)
                .clamp(0.0, 1.0);
            side_count += 1;

            let Some((mut htmin, htmax)) =
                sweep_circle_circle(position, radius, relative, circle.position, circle.radius)
            else {
                continue;
            };
            // Already overlapping, prefer moving apart.
            if htmin < 0.0 && htmax > 0.0 {
                htmin = -htmin * 0.5;
            }
            if htmin >= 0.0 && htmin < tmin {
                tmin = htmin;
                if tmin < threshold {
                    return min_penalty;
                }
            }
        }

        for segment in &self.segments {
            let htmin = if segment.touch {
                let direction = segment.q - segment.p;
                let normal = Vec3A::new(-direction.z, 0.0, direction.x);
                // Moving away from the wall.
                if dot_2d(normal, candidate) < 0.0 {
                    continue;
                }
                0.0
            } else {
                let Some(t) = intersect_ray_segment(position, candidate, segment.p, segment.q)
                else {
                    continue;
                };
                t
            };
            // Walls are less dangerous than agents.
            let htmin = htmin * 2.0;
            if htmin < tmin {
                tmin = htmin;
                if tmin < threshold {
                    return min_penalty;
                }
            }
        }

        if side_count > 0 {
            side /= side_count as f32;
        }
        let spen = params.weight_side * side;
        let tpen = params.weight_toi * (1.0 / (0.1 + tmin * self.inv_horiz_time));
        vpen + vcpen + spen + tpen
    }
}

/// The unit offsets sampled around the pattern center: the center itself, followed by rings
/// aligned with the desired direction, every other ring rotated by half a division.
fn sample_pattern(desired_velocity: Vec3A, params: &ObstacleAvoidanceParams) -> Vec<Vec3A> {
    let divs = params.adaptive_divs.clamp(1, MAX_PATTERN_DIVS) as usize;
    let rings = params.adaptive_rings.clamp(1, MAX_PATTERN_RINGS) as usize;
    let da = TAU / divs as f32;
    let (sa, ca) = da.sin_cos();

    let direction = normalize_2d(desired_velocity);
    let rotated = rotate_2d(direction, da * 0.5);

    let mut pattern = Vec::with_capacity(divs * rings + 1);
    pattern.push(Vec3A::ZERO);
    for ring in 0..rings {
        let r = (rings - ring) as f32 / rings as f32;
        let start = if ring % 2 == 0 { direction } else { rotated } * r;
        pattern.push(start);
        let mut right = start;
        let mut left = start;
        for _ in (1..divs.saturating_sub(1)).step_by(2) {
            right = Vec3A::new(right.x * ca + right.z * sa, 0.0, -right.x * sa + right.z * ca);
            left = Vec3A::new(left.x * ca - left.z * sa, 0.0, left.x * sa + left.z * ca);
            pattern.push(right);
            pattern.push(left);
        }
        if divs % 2 == 0 {
            pattern.push(Vec3A::new(left.x * ca - left.z * sa, 0.0, left.x * sa + left.z * ca));
        }
    }
    pattern
}

/// Times at which a circle at `c0` moving with `velocity` touches a static circle at `c1`.
fn sweep_circle_circle(
    c0: Vec3A,
    r0: f32,
    velocity: Vec3A,
    c1: Vec3A,
    r1: f32,
) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = c1 - c0;
    let r = r0 + r1;
    let c = dot_2d(s, s) - r * r;
    let a = dot_2d(velocity, velocity);
    if a < EPS {
        return None;
    }
    let b = dot_2d(velocity, s);
    let d = b * b - a * c;
    if d < 0.0 {
        return None;
    }
    let a = 1.0 / a;
    let rd = d.sqrt();
    Some(((b - rd) * a, (b + rd) * a))
}

/// Intersects the ray `origin + t * direction` with the segment `p..q` on the xz-plane.
fn intersect_ray_segment(origin: Vec3A, direction: Vec3A, p: Vec3A, q: Vec3A) -> Option<f32> {
    let v = q - p;
    let w = origin - p;
    let d = perp_2d(direction, v);
    if d.abs() < 1e-6 {
        return None;
    }
    let d = 1.0 / d;
    let t = perp_2d(v, w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = perp_2d(direction, w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

#[inline]
fn dot_2d(a: Vec3A, b: Vec3A) -> f32 {
    a.x * b.x + a.z * b.z
}

#[inline]
fn perp_2d(u: Vec3A, v: Vec3A) -> f32 {
    u.z * v.x - u.x * v.z
}

#[inline]
fn distance_2d(a: Vec3A, b: Vec3A) -> f32 {
    let d = a - b;
    (d.x * d.x + d.z * d.z).sqrt()
}

fn normalize_2d(v: Vec3A) -> Vec3A {
    let length = (v.x * v.x + v.z * v.z).sqrt();
    if length < 1e-6 {
        return Vec3A::ZERO;
    }
    Vec3A::new(v.x / length, 0.0, v.z / length)
}

fn rotate_2d(v: Vec3A, angle: f32) -> Vec3A {
    let (s, c) = angle.sin_cos();
    Vec3A::new(v.x * c - v.z * s, 0.0, v.x * s + v.z * c)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn pattern_has_center_and_rings() {
        let params = ObstacleAvoidanceParams::default();
        let pattern = sample_pattern(Vec3A::X, &params);
        // Center plus 7 samples on each of the two rings.
        assert_eq!(pattern.len(), 1 + 7 * 2);
        assert_eq!(pattern[0], Vec3A::ZERO);
        assert_relative_eq!(pattern[1].x, 1.0);
        for offset in &pattern[2..8] {
            assert_relative_eq!(offset.length(), 1.0, epsilon = 1e-5);
        }
        for offset in &pattern[8..] {
            assert_relative_eq!(offset.length(), 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn unobstructed_sampling_keeps_the_desired_direction() {
        let mut query = ObstacleAvoidanceQuery::new();
        let desired = Vec3A::new(2.0, 0.0, 0.0);
        let (velocity, samples) = query.sample_velocity_adaptive(
            Vec3A::ZERO,
            0.5,
            2.0,
            desired,
            desired,
            &ObstacleAvoidanceParams::default(),
        );
        assert!(samples > 0);
        assert!(velocity.x > 1.5, "velocity {velocity}");
        assert!(velocity.z.abs() < 0.5, "velocity {velocity}");
    }

    #[test]
    fn oncoming_agent_is_dodged() {
        let mut query = ObstacleAvoidanceQuery::new();
        let desired = Vec3A::new(2.0, 0.0, 0.0);
        query.add_circle(
            Vec3A::new(1.5, 0.0, 0.0),
            0.5,
            Vec3A::new(-2.0, 0.0, 0.0),
            Vec3A::new(-2.0, 0.0, 0.0),
        );
        let (velocity, _) = query.sample_velocity_adaptive(
            Vec3A::ZERO,
            0.5,
            2.0,
            desired,
            desired,
            &ObstacleAvoidanceParams::default(),
        );
        assert!(velocity.z.abs() > 0.1 || velocity.x < 1.0, "velocity {velocity}");
    }

    #[test]
    fn sweep_detects_head_on_contact() {
        let (tmin, tmax) =
            sweep_circle_circle(Vec3A::ZERO, 0.5, Vec3A::X, Vec3A::new(3.0, 0.0, 0.0), 0.5)
                .unwrap();
        assert_relative_eq!(tmin, 2.0);
        assert_relative_eq!(tmax, 4.0);
        assert!(sweep_circle_circle(Vec3A::ZERO, 0.5, Vec3A::Z, Vec3A::new(3.0, 0.0, 0.0), 0.5)
            .is_none());
    }

    #[test]
    fn ray_hits_segment_in_front() {
        let t = intersect_ray_segment(
            Vec3A::ZERO,
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(1.0, 0.0, -1.0),
            Vec3A::new(1.0, 0.0, 1.0),
        )
        .unwrap();
        assert_relative_eq!(t, 0.5);
        assert!(intersect_ray_segment(
            Vec3A::ZERO,
            Vec3A::new(-2.0, 0.0, 0.0),
            Vec3A::new(1.0, 0.0, -1.0),
            Vec3A::new(1.0, 0.0, 1.0),
        )
        .is_none());
    }
}
