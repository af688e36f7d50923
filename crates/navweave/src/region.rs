bitflags::bitflags! {
    /// A region id in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// Ids are plain numbers, the high bit marks regions painted along the tile border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// Spans that are not part of any region.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        const BORDER_REGION = 0x8000;
        /// The largest representable id, flags included.
        const MAX = u16::MAX;
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

impl RegionId {
    /// Returns `true` for real regions, i.e. neither [`RegionId::NONE`] nor a border region.
    #[inline]
    pub fn is_interior(self) -> bool {
        self != RegionId::NONE && !self.contains(RegionId::BORDER_REGION)
    }
}
