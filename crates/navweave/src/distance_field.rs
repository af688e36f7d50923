//! Distance field used to seed watershed partitioning.
//!
//! Each span stores an approximate distance to the nearest region boundary (a wall, a ledge or
//! an area change), in half-cell units.

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Prepares for region partitioning by calculating the distance field along the walkable surface.
    pub fn build_distance_field(&mut self) {
        let src = self.calculate_distance_field();
        self.max_distance = src.iter().copied().max().unwrap_or(0);
        self.dist = self.box_blur(1, &src);
    }

    fn calculate_distance_field(&self) -> Vec<u16> {
        let mut src = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    let same_area_neighbors = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|&neighbor| self.areas[neighbor] == area)
                        .count();
                    if same_area_neighbors != 4 {
                        src[i] = 0;
                    }
                }
            }
        }

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    self.relax_distance(&mut src, x, z, i, 0, 3);
                    self.relax_distance(&mut src, x, z, i, 3, 2);
                }
            }
        }
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    self.relax_distance(&mut src, x, z, i, 2, 1);
                    self.relax_distance(&mut src, x, z, i, 1, 0);
                }
            }
        }
        src
    }

    fn relax_distance(&self, dist: &mut [u16], x: u16, z: u16, i: usize, dir: u8, diagonal_dir: u8) {
        let Some((ax, az, ai)) = self.neighbor(x, z, i, dir) else {
            return;
        };
        dist[i] = dist[i].min(dist[ai].saturating_add(2));
        if let Some((_, _, aai)) = self.neighbor(ax, az, ai, diagonal_dir) {
            dist[i] = dist[i].min(dist[aai].saturating_add(3));
        }
    }

    /// 3x3 box blur that leaves spans close to the boundary untouched.
    fn box_blur(&self, threshold: u16, src: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut dst = vec![0_u16; src.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let center = src[i] as u32;
                    if center <= threshold as u32 {
                        dst[i] = center as u16;
                        continue;
                    }
                    let mut sum = center;
                    for dir in 0..4 {
                        let Some((ax, az, ai)) = self.neighbor(x, z, i, dir) else {
                            sum += center * 2;
                            continue;
                        };
                        sum += src[ai] as u32;
                        let diagonal_dir = (dir + 1) & 0x3;
                        sum += match self.neighbor(ax, az, ai, diagonal_dir) {
                            Some((_, _, aai)) => src[aai] as u32,
                            None => center,
                        };
                    }
                    dst[i] = ((sum + 5) / 9) as u16;
                }
            }
        }
        dst
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    #[test]
    fn distance_grows_towards_the_center() {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(9.0, 10.0, 9.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..9 {
            for x in 0..9 {
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

        let at = |x: u16, z: u16| compact.dist[compact.cell_at(x, z).index() as usize];
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(0, 4), 0);
        assert_eq!(compact.max_distance, 8);
        assert!(at(4, 4) > at(2, 4));
        assert!(at(2, 4) > at(1, 4));
    }
}
