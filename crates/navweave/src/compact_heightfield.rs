use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the walkable surface of a [`Heightfield`].
///
/// Where a [`Heightfield`] stores solid spans, a compact heightfield stores the open space
/// above them, together with the connections between neighboring open spans.
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = u16::MAX;
    /// The highest layer index a neighbor connection can store.
    pub(crate) const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Builds a compact heightfield from the walkable spans of a heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if a column holds more stacked walkable spans than a connection can address.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();
        let column_count = heightfield.width as usize * heightfield.height as usize;

        let mut compact = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb: heightfield.aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![CompactCell::default(); column_count],
            spans: Vec::with_capacity(walkable_span_count),
            dist: Vec::new(),
            areas: Vec::with_capacity(walkable_span_count),
        };
        compact.aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans.
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let cell = &mut compact.cells[column_index];
                cell.set_index(compact.spans.len() as u32);
                for (_, span) in heightfield.column(x, z) {
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if cell.count() == u8::MAX {
                        return Err(CompactHeightfieldError::TooManySpansInColumn { x, z });
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|next| heightfield.span(next).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let height = top.saturating_sub(bot).min(u8::MAX as u16) as u8;
                    compact.spans.push(CompactSpan::new(bot, height));
                    compact.areas.push(span.area());
                    cell.inc_count();
                }
            }
        }

        // Find neighbour connections.
        let mut too_high_neighbor = 0_usize;
        for z in 0..compact.height {
            for x in 0..compact.width {
                let cell = *compact.cell_at(x, z);
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        compact.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir);
                        let neighbor_z = z as i32 + dir_offset_z(dir);
                        if !heightfield.contains(neighbor_x, neighbor_z) {
                            continue;
                        }
                        let neighbor_cell = *compact.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let span_bot = compact.spans[i].y as i32;
                        let span_top = span_bot + compact.spans[i].height() as i32;

                        // Find the first neighbor span with enough clearance that is within climb range.
                        for k in neighbor_cell.index_range() {
                            let neighbor = &compact.spans[k];
                            let bot = span_bot.max(neighbor.y as i32);
                            let top = span_top.min(neighbor.y as i32 + neighbor.height() as i32);
                            let is_walkable = top - bot >= walkable_height as i32;
                            let is_climbable =
                                (neighbor.y as i32 - span_bot).abs() <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > Self::MAX_LAYERS as usize {
                                too_high_neighbor = too_high_neighbor.max(layer_index);
                                continue;
                            }
                            compact.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }

        if too_high_neighbor > Self::MAX_LAYERS as usize {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index: too_high_neighbor,
            });
        }
        Ok(compact)
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Returns the index of the span connected to span `span_index` at cell `(x, z)` in direction `dir`.
    /// `None` if there is no connection.
    #[inline]
    pub fn neighbor_index(&self, x: u16, z: u16, span_index: usize, dir: u8) -> Option<usize> {
        let con = self.spans[span_index].con(dir)?;
        let neighbor_x = (x as i32 + dir_offset_x(dir)) as u16;
        let neighbor_z = (z as i32 + dir_offset_z(dir)) as u16;
        Some(self.cell_at(neighbor_x, neighbor_z).index() as usize + con as usize)
    }

    /// Like [`Self::neighbor_index`], but also returns the neighbor cell coordinates.
    #[inline]
    pub(crate) fn neighbor(&self, x: u16, z: u16, span_index: usize, dir: u8) -> Option<(u16, u16, usize)> {
        let con = self.spans[span_index].con(dir)?;
        let neighbor_x = (x as i32 + dir_offset_x(dir)) as u16;
        let neighbor_z = (z as i32 + dir_offset_z(dir)) as u16;
        let index = self.cell_at(neighbor_x, neighbor_z).index() as usize + con as usize;
        Some((neighbor_x, neighbor_z, index))
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: usize,
    },
    /// A single column holds more walkable spans than a cell can count.
    #[error("Too many walkable spans in column ({x}, {z})")]
    TooManySpansInColumn {
        /// The x-coordinate of the column
        x: u16,
        /// The z-coordinate of the column
        z: u16,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn floor(size: u16, raised: &[(u16, u16, u16)]) -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size as f32, 20.0, size as f32),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                let max = raised
                    .iter()
                    .find(|(rx, rz, _)| *rx == x && *rz == z)
                    .map(|(_, _, max)| *max)
                    .unwrap_or(1);
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min: 0,
                            max,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield
    }

    #[test]
    fn flat_floor_is_fully_connected_inside() {
        let heightfield = floor(3, &[]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        assert_eq!(compact.spans.len(), 9);
        let center = compact.cell_at(1, 1).index() as usize;
        for dir in 0..4 {
            assert_eq!(compact.spans[center].con(dir), Some(0));
        }
        // Corner cells only connect inwards.
        let corner = compact.cell_at(0, 0).index() as usize;
        assert_eq!(compact.spans[corner].con(0), None);
        assert_eq!(compact.spans[corner].con(3), None);
        assert_eq!(compact.spans[corner].con(1), Some(0));
        assert_eq!(compact.spans[corner].con(2), Some(0));
        assert_eq!(compact.neighbor_index(0, 0, corner, 2), Some(1));
    }

    #[test]
    fn steps_above_climb_are_not_connected() {
        let heightfield = floor(3, &[(1, 1, 5)]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();
        let center = compact.cell_at(1, 1).index() as usize;
        for dir in 0..4 {
            assert_eq!(compact.spans[center].con(dir), None);
        }
    }

    #[test]
    fn bounds_grow_by_walkable_height() {
        let heightfield = floor(2, &[]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 3, 1).unwrap();
        approx::assert_relative_eq!(compact.aabb.max.y, 23.0);
    }
}
