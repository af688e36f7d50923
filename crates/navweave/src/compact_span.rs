use crate::region::RegionId;

/// A walkable span in a [`CompactHeightfield`](crate::CompactHeightfield).
/// Packed for memory efficiency.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompactSpan {
    /// The lower extent of the span. (Measured from the heightfield's base.)
    pub y: u16,
    /// The id of the region the span belongs to. (Or [`RegionId::NONE`] if not in a region.)
    pub region: RegionId,
    /// 24 bits: packed neighbor connection data
    /// 8 bits: the height of the span
    data: u32,
}

impl CompactSpan {
    pub(crate) const NOT_CONNECTED: u8 = 0x3f;

    /// A span at `y` with the given clearance above it, outside of any region.
    pub fn new(y: u16, height: u8) -> Self {
        let mut span = Self {
            y,
            ..Default::default()
        };
        span.set_height(height);
        span
    }

    /// Sets the neighbor connection data for the given direction.
    /// `None` if the neighbor is not connected.
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = (direction as u32 & 0x3) * 6;
        let value = neighbor.into().unwrap_or(Self::NOT_CONNECTED) as u32
            & Self::NOT_CONNECTED as u32;
        self.data = (self.data & !(0x3f << shift)) | (value << shift);
    }

    /// Returns the layer index of the connected span in the neighbor column for the given direction.
    /// `None` if the neighbor is not connected.
    pub fn con(&self, direction: u8) -> Option<u8> {
        let shift = (direction as u32 & 0x3) * 6;
        let value = ((self.data >> shift) & Self::NOT_CONNECTED as u32) as u8;
        (value != Self::NOT_CONNECTED).then_some(value)
    }

    /// Returns the height of the span.
    pub fn height(&self) -> u8 {
        (self.data >> 24) as u8
    }

    /// Sets the height of the span.
    pub fn set_height(&mut self, height: u8) {
        self.data = (self.data & 0x00FF_FFFF) | ((height as u32) << 24);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_does_not_touch_connections() {
        let mut span = CompactSpan::default();
        span.set_con(3, Some(7));
        span.set_height(200);
        assert_eq!(span.height(), 200);
        assert_eq!(span.con(3), Some(7));
    }

    #[test]
    fn new_spans_start_outside_of_regions() {
        let span = CompactSpan::new(12, 40);
        assert_eq!(span.y, 12);
        assert_eq!(span.height(), 40);
        assert_eq!(span.region, RegionId::NONE);
    }

    #[test]
    fn connections_are_independent_per_direction() {
        let mut span = CompactSpan::default();
        for dir in 0..4 {
            span.set_con(dir, None);
        }
        span.set_con(0, Some(1));
        span.set_con(2, Some(5));
        assert_eq!(span.con(0), Some(1));
        assert_eq!(span.con(1), None);
        assert_eq!(span.con(2), Some(5));
        assert_eq!(span.con(3), None);

        span.set_con(0, None);
        assert_eq!(span.con(0), None);
        assert_eq!(span.con(2), Some(5));
    }
}
