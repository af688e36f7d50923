use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius, so that agent centers on the remaining
    /// surface keep at least `walkable_radius` cells away from walls and ledges.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut dist = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        dist[i] = 0;
                        continue;
                    }
                    let walkable_neighbors = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|&neighbor| self.areas[neighbor].is_walkable())
                        .count();
                    if walkable_neighbors != 4 {
                        dist[i] = 0;
                    }
                }
            }
        }

        // Forward pass: (-1,0), (-1,-1), (0,-1), (1,-1)
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    self.relax_chamfer(&mut dist, x, z, i, 0, 3);
                    self.relax_chamfer(&mut dist, x, z, i, 3, 2);
                }
            }
        }
        // Backward pass: (1,0), (1,1), (0,1), (-1,1)
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    self.relax_chamfer(&mut dist, x, z, i, 2, 1);
                    self.relax_chamfer(&mut dist, x, z, i, 1, 0);
                }
            }
        }

        let threshold = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(&dist) {
            if *distance < threshold {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// Updates `dist[i]` from the straight neighbor in `dir` (cost 2) and the diagonal reached by
    /// turning to `diagonal_dir` from there (cost 3).
    fn relax_chamfer(&self, dist: &mut [u8], x: u16, z: u16, i: usize, dir: u8, diagonal_dir: u8) {
        let Some((ax, az, ai)) = self.neighbor(x, z, i, dir) else {
            return;
        };
        dist[i] = dist[i].min(dist[ai].saturating_add(2));
        if let Some((_, _, aai)) = self.neighbor(ax, az, ai, diagonal_dir) {
            dist[i] = dist[i].min(dist[aai].saturating_add(3));
        }
    }
}
