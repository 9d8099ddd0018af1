use bitflags::bitflags;

bitflags! {
    /// Reasons that restrict or prevent resizing a device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResizeReasons: u32 {
        /// The device type cannot be resized at all.
        const NO_SUPPORT = 1 << 0;
        /// A filesystem on the device cannot be shrunk.
        const FS_NO_SHRINK = 1 << 1;
        /// A filesystem on the device cannot be grown.
        const FS_NO_GROW = 1 << 2;
        /// The minimal size exceeds the maximal size.
        const MIN_TOO_BIG = 1 << 3;
        /// There is no free space behind the device to grow into.
        const NO_SPACE = 1 << 4;
    }
}

/// Whether a device may be resized and within which bounds, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeInfo {
    pub resize_ok: bool,
    pub reasons: ResizeReasons,
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for ResizeInfo {
    fn default() -> Self {
        Self::with_limits(0, u64::MAX)
    }
}

impl ResizeInfo {
    pub fn with_limits(min_size: u64, max_size: u64) -> Self {
        ResizeInfo {
            resize_ok: true,
            reasons: ResizeReasons::empty(),
            min_size,
            max_size,
        }
    }

    pub fn unsupported(reasons: ResizeReasons) -> Self {
        ResizeInfo {
            resize_ok: false,
            reasons,
            ..Self::default()
        }
    }

    /// Narrows this info by the constraints of `extra`.
    pub fn combine(&mut self, extra: &ResizeInfo) {
        self.resize_ok &= extra.resize_ok;
        self.reasons |= extra.reasons;
        self.min_size = self.min_size.max(extra.min_size);
        self.max_size = self.max_size.min(extra.max_size);
    }

    /// Moves both limits up by `offset`, e.g. for container metadata in front
    /// of the payload.
    pub fn shift(&mut self, offset: u64) {
        self.min_size = self.min_size.saturating_add(offset);
        self.max_size = self.max_size.saturating_add(offset);
    }

    /// Disables resizing when the limits contradict each other.
    pub fn check(&mut self) {
        if self.min_size > self.max_size {
            self.resize_ok = false;
            self.reasons |= ResizeReasons::MIN_TOO_BIG;
        }
    }
}

#[cfg(test)]
mod tests {
    use sysdefs::units::{GIB, MIB};

    use super::*;

    #[test]
    fn test_combine() {
        let mut info = ResizeInfo::with_limits(512, 30 * GIB);
        info.combine(&ResizeInfo::with_limits(32 * MIB, 16 * 1024 * GIB));
        assert!(info.resize_ok);
        assert_eq!(info.min_size, 32 * MIB);
        assert_eq!(info.max_size, 30 * GIB);

        info.combine(&ResizeInfo::unsupported(ResizeReasons::FS_NO_GROW));
        assert!(!info.resize_ok);
        assert_eq!(info.reasons, ResizeReasons::FS_NO_GROW);
        assert_eq!(info.min_size, 32 * MIB);
    }

    #[test]
    fn test_shift_and_check() {
        let mut info = ResizeInfo::with_limits(32 * MIB, u64::MAX);
        info.shift(2 * MIB);
        assert_eq!(info.min_size, 34 * MIB);
        assert_eq!(info.max_size, u64::MAX);

        info.check();
        assert!(info.resize_ok);

        info.combine(&ResizeInfo::with_limits(0, MIB));
        info.check();
        assert!(!info.resize_ok);
        assert!(info.reasons.contains(ResizeReasons::MIN_TOO_BIG));
    }
}
