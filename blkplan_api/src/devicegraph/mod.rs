//! # Devicegraph
//!
//! A devicegraph is a directed acyclic graph whose vertices are devices and
//! whose edges point from a device to the devices using it (disk → partition
//! table → partition → filesystem).
//!
//! Every device carries a sid that is unique for the process and stable across
//! copies of the device in other devicegraphs. Devices record their own
//! position inside the devicegraph holding them; the position is assigned and
//! validated when the device is inserted.
//!
//! Two devicegraphs are usually alive at the same time: the probed one
//! reflecting the system and the staging one describing the desired state.
//! The type itself is agnostic to this role.

mod device;
mod graph;
mod persistence;
mod probe;
mod resize;
mod sid;

pub(crate) use device::{stub, stub_text};
pub use device::{Device, DeviceImpl, Membership};
pub use graph::{DeviceGraph, DeviceIndex, DeviceRef, Holder};
pub use probe::{
    probe, BlockDeviceInfo, BlockDeviceKind, ProbeContext, ProbeKey, SystemInfo,
};
pub use resize::{ResizeInfo, ResizeReasons};
pub use sid::{GraphId, Sid, SidAllocator};
