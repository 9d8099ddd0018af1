use std::{
    fmt::Display,
    sync::atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{constants::DEFAULT_SID_START, error::DeviceGraphError};

/// Storage id of a device. Unique within the process and stable for the
/// lifetime of the device, including copies of it in other devicegraphs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Sid(pub u32);

impl Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle identifying one devicegraph instance, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u32);

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(0);

impl GraphId {
    pub(crate) fn next() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Hands out sids.
///
/// Allocation is monotonic and never reuses a value. Once the sid space is
/// used up, allocation fails. Devicegraphs that
/// exchange devices (probed and staging) must share one allocator so that
/// newly created devices never collide with existing ones.
#[derive(Debug)]
pub struct SidAllocator {
    next_sid: AtomicU32,
}

impl Default for SidAllocator {
    fn default() -> Self {
        Self::starting_at(DEFAULT_SID_START)
    }
}

impl SidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator whose first sid is `first`.
    pub fn starting_at(first: u32) -> Self {
        SidAllocator {
            next_sid: AtomicU32::new(first),
        }
    }

    pub fn next_sid(&self) -> Result<Sid, DeviceGraphError> {
        self.next_sid
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(1)
            })
            .map(Sid)
            .map_err(|_| DeviceGraphError::SidsExhausted)
    }

    /// The sid the next allocation will return.
    pub fn peek(&self) -> Sid {
        Sid(self.next_sid.load(Ordering::Relaxed))
    }

    /// Makes sure that `sid` is never handed out again, e.g. after loading a
    /// saved devicegraph.
    pub fn reserve_past(&self, sid: Sid) {
        self.next_sid
            .fetch_max(sid.0.saturating_add(1), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation() {
        let allocator = SidAllocator::new();
        assert_eq!(allocator.next_sid().unwrap(), Sid(42));
        assert_eq!(allocator.next_sid().unwrap(), Sid(43));
        assert_eq!(allocator.peek(), Sid(44));

        let allocator = SidAllocator::starting_at(1);
        assert_eq!(allocator.next_sid().unwrap(), Sid(1));
    }

    #[test]
    fn test_exhausted() {
        let allocator = SidAllocator::starting_at(u32::MAX - 1);
        assert_eq!(allocator.next_sid().unwrap(), Sid(u32::MAX - 1));
        assert_eq!(allocator.next_sid(), Err(DeviceGraphError::SidsExhausted));
        // The last sid is never handed out twice.
        assert_eq!(allocator.next_sid(), Err(DeviceGraphError::SidsExhausted));

        let allocator = SidAllocator::starting_at(1);
        allocator.reserve_past(Sid(u32::MAX));
        assert_eq!(allocator.next_sid(), Err(DeviceGraphError::SidsExhausted));
    }

    #[test]
    fn test_graph_ids() {
        // Separate allocators still give out distinct handles.
        let first = SidAllocator::starting_at(1);
        let second = SidAllocator::starting_at(1);
        assert_eq!(first.next_sid().unwrap(), second.next_sid().unwrap());
        assert_ne!(GraphId::next(), GraphId::next());
    }

    #[test]
    fn test_reserve_past() {
        let allocator = SidAllocator::starting_at(1);
        allocator.reserve_past(Sid(10));
        assert_eq!(allocator.next_sid().unwrap(), Sid(11));

        // Never moves backwards.
        allocator.reserve_past(Sid(3));
        assert_eq!(allocator.next_sid().unwrap(), Sid(12));
    }
}
