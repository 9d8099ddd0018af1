use std::fmt::Display;

use sysdefs::units::KIB;

/// A size in bytes, displayed with binary units for human consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteCount(pub u64);

impl From<u64> for ByteCount {
    fn from(x: u64) -> Self {
        ByteCount(x)
    }
}

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

impl ByteCount {
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Renders the count with the largest unit that keeps the value >= 1.
    ///
    /// Exact multiples are printed without decimals, e.g. `10 GiB`; other
    /// values keep two decimals, e.g. `1.50 MiB`.
    pub fn to_human_readable(&self) -> String {
        let mut unit = 0;
        let mut divisor: u64 = 1;
        while unit + 1 < UNITS.len() && self.0 / divisor >= KIB {
            divisor *= KIB;
            unit += 1;
        }

        if self.0 % divisor == 0 {
            format!("{} {}", self.0 / divisor, UNITS[unit])
        } else {
            format!("{:.2} {}", self.0 as f64 / divisor as f64, UNITS[unit])
        }
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}
