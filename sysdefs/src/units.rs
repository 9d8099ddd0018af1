//! Binary size units.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Size of a classic disk sector.
pub const SECTOR_SIZE: u64 = 512;
