use serde::{Deserialize, Serialize};

use sysdefs::units::SECTOR_SIZE;

/// Extent of a device, counted in blocks of `block_size` bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub struct Region {
    pub start: u64,
    pub length: u64,
    pub block_size: u64,
}

impl Default for Region {
    fn default() -> Self {
        Region {
            start: 0,
            length: 0,
            block_size: SECTOR_SIZE,
        }
    }
}

impl Region {
    pub fn new(start: u64, length: u64, block_size: u64) -> Self {
        Region {
            start,
            length,
            block_size,
        }
    }

    /// First block past the region.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.to_bytes(self.length)
    }

    pub fn to_bytes(&self, blocks: u64) -> u64 {
        blocks * self.block_size
    }

    /// Converts a byte count to blocks, rounding down.
    pub fn to_blocks(&self, bytes: u64) -> u64 {
        bytes / self.block_size
    }

    /// Returns a copy of this region holding `bytes`, rounded down to whole
    /// blocks.
    pub fn with_size(&self, bytes: u64) -> Region {
        Region {
            length: self.to_blocks(bytes),
            ..*self
        }
    }

    fn byte_range(&self) -> (u64, u64) {
        (self.to_bytes(self.start), self.to_bytes(self.end()))
    }

    /// Whether `other` lies completely inside this region. Regions with
    /// different block sizes are compared in bytes.
    pub fn contains(&self, other: &Region) -> bool {
        let (start, end) = self.byte_range();
        let (other_start, other_end) = other.byte_range();
        start <= other_start && other_end <= end
    }

    /// Whether the two regions share at least one byte.
    pub fn overlaps(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        let (start, end) = self.byte_range();
        let (other_start, other_end) = other.byte_range();
        start < other_end && other_start < end
    }
}

#[cfg(test)]
mod tests {
    use sysdefs::units::{GIB, MIB};

    use super::*;

    const SPG: u64 = GIB / 512;

    #[test]
    fn test_region_geometry() {
        let region = Region::new(10 * SPG, 10 * SPG, 512);
        assert_eq!(region.end(), 20 * SPG);
        assert_eq!(region.size(), 10 * GIB);
        assert_eq!(region.to_blocks(MIB + 100), 2048);
        assert_eq!(region.with_size(GIB + 100).length, SPG);
        assert!(!region.is_empty());
        assert!(Region::default().is_empty());
    }

    #[test]
    fn test_region_overlap() {
        let a = Region::new(0, 100, 512);
        let b = Region::new(100, 100, 512);
        let c = Region::new(50, 100, 512);

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(!a.overlaps(&Region::new(10, 0, 512)));

        // Same extent in a different block size.
        let d = Region::new(0, 25, 2048);
        assert!(d.overlaps(&a));
        assert!(a.contains(&d));
        assert!(d.contains(&a));
        assert!(!a.contains(&c));
    }
}
