//! Watershed partitioning
//!   - the classic Recast partitioning
//!   - creates the nicest tessellation
//!   - partitions the heightfield into nice regions without holes or overlaps
//!   - there are some corner cases where this method produces holes and overlaps
//!      - holes may appear when a small obstacle is close to a large open area (triangulation can handle this)
//!      - overlaps may occur with narrow spiral corridors (i.e. stairs), which make triangulation fail
//!
//! The distance field must be built with [`CompactHeightfield::build_distance_field`] first.

use thiserror::Error;
use tracing::debug;

use crate::{CompactHeightfield, region::RegionId, span::AreaType};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;
const EXPAND_ITERS: u16 = 8;
const BORDER: u16 = RegionId::BORDER_REGION.bits();

impl CompactHeightfield {
    /// Partitions the walkable surface into non-overlapping regions.
    ///
    /// Non-null regions consist of connected, non-overlapping walkable spans that form a single contour.
    /// Islands smaller than `min_region_area` spans are removed unless they touch the tile border,
    /// and regions smaller than `merge_region_area` spans are merged into a neighbor where possible.
    ///
    /// The result is written to [`CompactSpan::region`](crate::CompactSpan::region) and
    /// [`CompactHeightfield::max_region`].
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionBuildError> {
        if self.dist.len() != self.spans.len() {
            return Err(RegionBuildError::MissingDistanceField);
        }
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![0_u16; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = 1_u16;
        let mut level = (self.max_distance + 1) & !1;

        if border_size > 0 {
            // Make sure border will not overflow.
            let bw = border_size.min(self.width);
            let bh = border_size.min(self.height);
            let rects = [
                (0, bw, 0, self.height),
                (self.width - bw, self.width, 0, self.height),
                (0, self.width, 0, bh),
                (0, self.width, self.height - bh, self.height),
            ];
            for (min_x, max_x, min_z, max_z) in rects {
                self.paint_rect_region(min_x, max_x, min_z, max_z, region_id | BORDER, &mut src_reg);
                region_id += 1;
            }
        }
        self.border_size = border_size;

        let mut stack_id = NB_STACKS - 1;
        while level > 0 {
            level = level.saturating_sub(2);
            stack_id = (stack_id + 1) & (NB_STACKS - 1);

            if stack_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // Carry over what the previous level could not reach.
                let (previous, current) = level_stacks.split_at_mut(stack_id);
                append_stacks(&previous[stack_id - 1], &mut current[0], &src_reg);
            }

            self.expand_regions(
                EXPAND_ITERS,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[stack_id],
                false,
            );

            // Mark new regions with ids.
            for j in 0..level_stacks[stack_id].len() {
                let entry = level_stacks[stack_id][j];
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != 0 {
                    continue;
                }
                if self.flood_region(entry, level, region_id, &mut src_reg, &mut src_dist, &mut stack)
                {
                    if region_id == u16::MAX {
                        return Err(RegionBuildError::RegionIdOverflow);
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells are found.
        self.expand_regions(
            EXPAND_ITERS * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        let max_region = self.merge_and_filter_regions(
            min_region_area as usize,
            merge_region_area as usize,
            region_id,
            &mut src_reg,
        );
        self.max_region = RegionId::from(max_region);

        for (span, region) in self.spans.iter_mut().zip(&src_reg) {
            span.region = RegionId::from(*region);
        }
        debug!(regions = max_region, "partitioned walkable area");
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: u16,
        src_reg: &mut [u16],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[u16],
        stacks: &mut [Vec<LevelStackEntry>; NB_STACKS],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != 0 {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    let stack_id = start_level.saturating_sub(level) as usize;
                    if stack_id >= NB_STACKS {
                        continue;
                    }
                    stacks[stack_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [u16],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level && src_reg[i] == 0 && self.areas[i].is_walkable() {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // Mark all cells which already have a region.
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != 0) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries: Vec<DirtyEntry> = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(ai) = self.neighbor_index(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if self.areas[ai] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[ai];
                    if neighbor_region > 0 && neighbor_region & BORDER == 0 {
                        let neighbor_distance = src_dist[ai] as u32 + 2;
                        if neighbor_distance < distance as u32 {
                            region = neighbor_region;
                            distance = neighbor_distance as u16;
                        }
                    }
                }
                if region != 0 {
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }

            // Applied after the sweep so every cell in a pass sees the same state.
            for dirty in &dirty_entries {
                src_reg[dirty.index] = dirty.region;
                src_dist[dirty.index] = dirty.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    fn flood_region(
        &self,
        start: LevelStackEntry,
        level: u16,
        region: u16,
        src_reg: &mut [u16],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(start_index) = start.index else {
            return false;
        };
        let area = self.areas[start_index];

        stack.clear();
        stack.push(start);
        src_reg[start_index] = region;
        src_dist[start_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(LevelStackEntry { x, z, index }) = stack.pop() {
            let Some(ci) = index else {
                continue;
            };

            // Check if any of the 8 neighbours already have a valid region set.
            let mut adjacent_region = 0;
            for dir in 0..4 {
                let Some((ax, az, ai)) = self.neighbor(x, z, ci, dir) else {
                    continue;
                };
                if self.areas[ai] != area {
                    continue;
                }
                let neighbor_region = src_reg[ai];
                if neighbor_region & BORDER != 0 {
                    continue;
                }
                if neighbor_region != 0 && neighbor_region != region {
                    adjacent_region = neighbor_region;
                    break;
                }
                let diagonal_dir = (dir + 1) & 0x3;
                if let Some(ai2) = self.neighbor_index(ax, az, ai, diagonal_dir) {
                    if self.areas[ai2] != area {
                        continue;
                    }
                    let diagonal_region = src_reg[ai2];
                    if diagonal_region != 0 && diagonal_region != region {
                        adjacent_region = diagonal_region;
                        break;
                    }
                }
            }
            if adjacent_region != 0 {
                src_reg[ci] = 0;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some((ax, az, ai)) = self.neighbor(x, z, ci, dir) else {
                    continue;
                };
                if self.areas[ai] != area {
                    continue;
                }
                if self.dist[ai] >= lev && src_reg[ai] == 0 {
                    src_reg[ai] = region;
                    src_dist[ai] = 0;
                    stack.push(LevelStackEntry {
                        x: ax,
                        z: az,
                        index: Some(ai),
                    });
                }
            }
        }

        count > 0
    }

    fn is_solid_edge(&self, src_reg: &[u16], x: u16, z: u16, i: usize, dir: u8) -> bool {
        let neighbor_region = self
            .neighbor_index(x, z, i, dir)
            .map(|ai| src_reg[ai])
            .unwrap_or(0);
        neighbor_region != src_reg[i]
    }

    /// Walks the outline of the region containing span `i`, starting at the solid edge `dir`,
    /// and records the sequence of neighboring regions.
    fn walk_region_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        mut dir: u8,
        src_reg: &[u16],
    ) -> Vec<u16> {
        let start_dir = dir;
        let start_index = i;

        let mut current_region = self
            .neighbor_index(x, z, i, dir)
            .map(|ai| src_reg[ai])
            .unwrap_or(0);
        let mut connections = vec![current_region];

        for _ in 1..40000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                let region = self
                    .neighbor_index(x, z, i, dir)
                    .map(|ai| src_reg[ai])
                    .unwrap_or(0);
                if region != current_region {
                    current_region = region;
                    connections.push(current_region);
                }
                // Rotate clockwise.
                dir = (dir + 1) & 0x3;
            } else {
                let Some((nx, nz, ni)) = self.neighbor(x, z, i, dir) else {
                    // Not a solid edge, so the neighbor exists.
                    return connections;
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

        remove_adjacent_duplicates(&mut connections);
        connections
    }

    /// Returns the new highest region id.
    fn merge_and_filter_regions(
        &self,
        min_region_area: usize,
        merge_region_size: usize,
        max_region_id: u16,
        src_reg: &mut [u16],
    ) -> u16 {
        let region_count = max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|id| Region::new(id as u16))
            .collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i] as usize;
                    if r == 0 || r >= region_count {
                        continue;
                    }
                    regions[r].span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor = src_reg[j];
                        if floor == 0 || floor as usize >= region_count {
                            continue;
                        }
                        if floor as usize == r {
                            regions[r].overlap = true;
                        }
                        regions[r].add_unique_floor(floor);
                    }

                    // Contour already found.
                    if !regions[r].connections.is_empty() {
                        continue;
                    }
                    regions[r].area = self.areas[i];

                    // Walk around the contour if this cell is next to a border.
                    if let Some(dir) = (0..4).find(|&dir| self.is_solid_edge(src_reg, x, z, i, dir)) {
                        regions[r].connections = self.walk_region_contour(x, z, i, dir, src_reg);
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack: Vec<usize> = Vec::with_capacity(32);
        let mut trace: Vec<usize> = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if region.id == 0 || region.id & BORDER != 0 || region.span_count == 0 || region.visited
            {
                continue;
            }

            // Count the total size of all the connected regions, and whether any of them touches
            // the tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);
            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);
                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if connection & BORDER != 0 {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection as usize];
                    if neighbor.visited || neighbor.id == 0 || neighbor.id & BORDER != 0 {
                        continue;
                    }
                    neighbor.visited = true;
                    stack.push(neighbor.id as usize);
                }
            }

            // The size of areas touching the border cannot be judged from one tile.
            if span_count < min_region_area && !connects_to_border {
                for &ri in &trace {
                    regions[ri].span_count = 0;
                    regions[ri].id = 0;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if region.id == 0 || region.id & BORDER != 0 || region.overlap || region.span_count == 0 {
                    continue;
                }
                // Large regions that touch a wall stay as they are.
                if region.span_count > merge_region_size && region.is_connected_to_border() {
                    continue;
                }

                // Find the smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for &connection in &region.connections {
                    if connection & BORDER != 0 {
                        continue;
                    }
                    let candidate = &regions[connection as usize];
                    if candidate.id == 0 || candidate.id & BORDER != 0 || candidate.overlap {
                        continue;
                    }
                    if candidate.span_count < smallest
                        && region.can_merge_with(candidate)
                        && candidate.can_merge_with(region)
                    {
                        smallest = candidate.span_count;
                        merge_id = candidate.id;
                    }
                }

                if merge_id == region.id {
                    continue;
                }
                let old_id = region.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    // Fix up regions pointing to the current region.
                    for other in regions.iter_mut() {
                        if other.id == 0 || other.id & BORDER != 0 {
                            continue;
                        }
                        if other.id == old_id {
                            other.id = merge_id;
                        }
                        other.replace_neighbor(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region ids.
        for region in regions.iter_mut() {
            region.remap = region.id != 0 && region.id & BORDER == 0;
        }
        // Regions without spans of their own either merged into a survivor, which renames them
        // below, or are empty and take no id.
        let mut next_id = 0_u16;
        for i in 0..region_count {
            if !regions[i].remap || regions[i].span_count == 0 {
                continue;
            }
            let old_id = regions[i].id;
            next_id += 1;
            for region in regions.iter_mut() {
                if region.remap && region.id == old_id {
                    region.id = next_id;
                    region.remap = false;
                }
            }
        }

        // Remap regions.
        for region in src_reg.iter_mut() {
            if *region & BORDER == 0 {
                *region = regions[*region as usize].id;
            }
        }

        let overlapping = regions.iter().filter(|region| region.overlap).count();
        if overlapping > 0 {
            debug!(overlapping, "regions overlap vertically");
        }
        next_id
    }
}

fn append_stacks(source: &[LevelStackEntry], destination: &mut Vec<LevelStackEntry>, src_reg: &[u16]) {
    destination.extend(
        source
            .iter()
            .filter(|entry| entry.index.is_some_and(|i| src_reg[i] == 0))
            .copied(),
    );
}

fn remove_adjacent_duplicates(connections: &mut Vec<u16>) {
    let mut i = 0;
    while i < connections.len() && connections.len() > 1 {
        let next = (i + 1) % connections.len();
        if connections[i] == connections[next] {
            connections.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Merges region `b` into region `a` if they share an edge.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let a_id = regions[a].id;
    let b_id = regions[b].id;
    let a_connections = regions[a].connections.clone();
    let b_connections = regions[b].connections.clone();

    let Some(insert_a) = a_connections.iter().position(|&c| c == b_id) else {
        return false;
    };
    let Some(insert_b) = b_connections.iter().position(|&c| c == a_id) else {
        return false;
    };

    let mut merged = Vec::with_capacity(a_connections.len() + b_connections.len());
    let na = a_connections.len();
    for i in 0..na - 1 {
        merged.push(a_connections[(insert_a + 1 + i) % na]);
    }
    let nb = b_connections.len();
    for i in 0..nb - 1 {
        merged.push(b_connections[(insert_b + 1 + i) % nb]);
    }
    remove_adjacent_duplicates(&mut merged);

    let b_floors = std::mem::take(&mut regions[b].floors);
    let b_span_count = regions[b].span_count;
    let region_a = &mut regions[a];
    region_a.connections = merged;
    for floor in b_floors {
        region_a.add_unique_floor(floor);
    }
    region_a.span_count += b_span_count;

    let region_b = &mut regions[b];
    region_b.span_count = 0;
    region_b.connections.clear();
    true
}

#[derive(Clone, Copy, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: u16,
    distance: u16,
}

#[derive(Clone, Debug)]
struct Region {
    span_count: usize,
    id: u16,
    area: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    /// Neighboring region ids in contour order. 0 is a wall.
    connections: Vec<u16>,
    /// Regions stacked in the same columns.
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn add_unique_floor(&mut self, floor: u16) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area != other.area {
            return false;
        }
        let shared_edges = self.connections.iter().filter(|&&c| c == other.id).count();
        shared_edges <= 1 && !self.floors.contains(&other.id)
    }

    fn replace_neighbor(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for connection in self.connections.iter_mut() {
            if *connection == old_id {
                *connection = new_id;
                changed = true;
            }
        }
        for floor in self.floors.iter_mut() {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if changed {
            remove_adjacent_duplicates(&mut self.connections);
        }
    }
}

/// Errors that can occur when partitioning a [`CompactHeightfield`] into regions.
#[derive(Error, Debug)]
pub enum RegionBuildError {
    /// More regions were flooded than a region id can address.
    #[error("Region id overflow: more than {max} regions", max = u16::MAX)]
    RegionIdOverflow,
    /// [`CompactHeightfield::build_distance_field`] was not run first.
    #[error("The distance field has not been built")]
    MissingDistanceField,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::{Heightfield, SpanInsertion},
        span::SpanBuilder,
    };

    use super::*;

    fn heightfield(size: u16) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size as f32, 10.0, size as f32),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn fill(heightfield: &mut Heightfield, xs: std::ops::Range<u16>, zs: std::ops::Range<u16>) {
        for z in zs {
            for x in xs.clone() {
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
    }

    fn regions_of(heightfield: &Heightfield, border: u16, min_area: u16) -> CompactHeightfield {
        let mut compact = CompactHeightfield::from_heightfield(heightfield, 2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(border, min_area, 20).unwrap();
        compact
    }

    #[test]
    fn open_square_is_one_region() {
        let mut heightfield = heightfield(12);
        fill(&mut heightfield, 0..12, 0..12);
        let compact = regions_of(&heightfield, 0, 4);
        assert_eq!(compact.max_region, RegionId::from(1));
        assert!(compact.spans.iter().all(|span| span.region == RegionId::from(1)));
    }

    #[test]
    fn border_cells_get_border_regions() {
        let mut heightfield = heightfield(12);
        fill(&mut heightfield, 0..12, 0..12);
        let compact = regions_of(&heightfield, 2, 4);
        let corner = compact.cell_at(11, 11).index() as usize;
        assert!(compact.spans[corner].region.contains(RegionId::BORDER_REGION));
        let center = compact.cell_at(6, 6).index() as usize;
        assert!(compact.spans[center].region.is_interior());
    }

    #[test]
    fn small_islands_are_removed() {
        let mut heightfield = heightfield(16);
        fill(&mut heightfield, 0..8, 0..8);
        fill(&mut heightfield, 12..14, 12..14);
        let compact = regions_of(&heightfield, 0, 9);
        let island = compact.cell_at(12, 12).index() as usize;
        assert_eq!(compact.spans[island].region, RegionId::NONE);
        let big = compact.cell_at(3, 3).index() as usize;
        assert!(compact.spans[big].region.is_interior());
        assert_eq!(compact.max_region, RegionId::from(1));
    }

    #[test]
    fn region_ids_are_dense() {
        let mut heightfield = heightfield(16);
        fill(&mut heightfield, 0..6, 0..6);
        fill(&mut heightfield, 9..15, 9..15);
        let compact = regions_of(&heightfield, 0, 4);
        let max = compact.max_region.bits();
        assert!(max >= 2);
        for id in 1..=max {
            assert!(
                compact
                    .spans
                    .iter()
                    .any(|span| span.region == RegionId::from(id)),
                "region {id} has no spans"
            );
        }
    }

    #[test]
    fn missing_distance_field_is_an_error() {
        let mut heightfield = heightfield(4);
        fill(&mut heightfield, 0..4, 0..4);
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        assert!(matches!(
            compact.build_regions(0, 0, 0),
            Err(RegionBuildError::MissingDistanceField)
        ));
    }

    #[test]
    fn adjacent_duplicates_wrap_around() {
        let mut connections = vec![0, 3, 3, 5, 0];
        remove_adjacent_duplicates(&mut connections);
        assert_eq!(connections, vec![0, 3, 5]);
    }
}
