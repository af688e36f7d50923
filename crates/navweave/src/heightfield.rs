//! The voxel grid produced by rasterization.
//!
//! A [`Heightfield`] is a 2D grid of columns on the xz-plane, where each column holds an
//! ordered, non-overlapping list of solid [`Span`]s from bottom to top.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// A dynamic voxel heightfield. Build with [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The lowest span of every column, in `x + z * width` order.
    pub spans: Vec<Option<SpanKey>>,
    /// All spans in the heightfield
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, merging it with every span it overlaps.
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        let SpanInsertion {
            x,
            z,
            flag_merge_threshold,
            span: mut new_span,
        } = insertion;
        if x >= self.width || z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds { x, z });
        }
        let column_index = self.column_index(x, z);

        let mut previous_key: Option<SpanKey> = None;
        let mut cursor = self.spans[column_index];
        while let Some(current_key) = cursor {
            let current = self.span(current_key).clone();
            cursor = current.next();
            if current.min() > new_span.max() {
                // Everything from here on lies above the new span.
                break;
            }
            if current.max() < new_span.min() {
                previous_key = Some(current_key);
                continue;
            }

            // Overlap: absorb the existing span.
            new_span.set_min(new_span.min().min(current.min()));
            new_span.set_max(new_span.max().max(current.max()));
            if new_span.max().abs_diff(current.max()) <= flag_merge_threshold {
                // Higher area ids win.
                new_span.set_area(new_span.area().max(current.area()));
            }

            self.allocated_spans.remove(current_key);
            match previous_key {
                Some(previous_key) => self.span_mut(previous_key).set_next(cursor),
                None => self.spans[column_index] = cursor,
            }
        }

        let next = match previous_key {
            Some(previous_key) => self.span(previous_key).next(),
            None => self.spans[column_index],
        };
        new_span.set_next(next);
        let new_key = self.allocated_spans.insert(new_span);
        match previous_key {
            Some(previous_key) => self.span_mut(previous_key).set_next(new_key),
            None => self.spans[column_index] = Some(new_key),
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// Returns the lowest span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Iterates the spans of a column from bottom to top.
    pub fn column(&self, x: u16, z: u16) -> impl Iterator<Item = (SpanKey, &Span)> {
        let mut cursor = self.span_key_at(x, z);
        std::iter::from_fn(move || {
            let key = cursor?;
            let span = self.span(key);
            cursor = span.next();
            Some((key, span))
        })
    }

    /// Returns the keys of a column from bottom to top.
    pub(crate) fn column_keys(&self, x: u16, z: u16) -> Vec<SpanKey> {
        self.column(x, z).map(|(key, _)| key).collect()
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// Returns a mutable reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }
}

/// A builder for [`Heightfield`]s.
pub struct HeightfieldBuilder {
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Builds an empty heightfield covering [`HeightfieldBuilder::aabb`].
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        if !(self.cell_size > 0.0 && self.cell_height > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize {
                cell_size: self.cell_size,
                cell_height: self.cell_height,
            });
        }
        let width = ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5).max(0.0);
        let height = ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5).max(0.0);
        if width > u16::MAX as f32 || height > u16::MAX as f32 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let width = width as u16;
        let height = height as u16;
        let column_count = width as usize * height as usize;
        Ok(Heightfield {
            width,
            height,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            spans: vec![None; column_count],
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// Happens when the grid does not fit into 16-bit cell coordinates.
    #[error("Heightfield is too large, got {width}x{height} cells but max is {max} per axis", max = u16::MAX)]
    ColumnCountTooLarge {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The height of the heightfield along the z-axis in cell units
        height: f32,
    },
    /// Happens when a cell dimension is zero, negative or NaN.
    #[error("Cell dimensions must be positive, got cell_size={cell_size}, cell_height={cell_height}")]
    InvalidCellSize {
        /// The requested xz-plane cell size
        cell_size: f32,
        /// The requested y-axis cell size
        cell_height: f32,
    },
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
}

pub(crate) struct SpanInsertion {
    /// The x-coordinate of the span
    pub(crate) x: u16,
    /// The z-coordinate of the span
    pub(crate) z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub(crate) flag_merge_threshold: u16,
    /// The span to insert
    pub(crate) span: Span,
}
