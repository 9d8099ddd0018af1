//! Two-pass population of a devicegraph from system information.
//!
//! Discovery decides which devices exist. Pass 1 then runs on every device
//! and fills the attributes that need no other device. Pass 2 runs only once
//! pass 1 is complete for all devices and resolves the parents of each
//! device; the pipeline inserts the resulting holders.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    sync::Arc,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use sysdefs::{
    filesystems::{ContainerSignature, DetectedSignature},
    units::SECTOR_SIZE,
};

use crate::{
    devices::{
        split_lvm_name, Disk, DeviceKind, Encryption, Filesystem, LvmLv, LvmPv, LvmVg,
        Multipath, Partition, PartitionTable, PtType,
    },
    error::ProbeError,
};

use super::{
    graph::{DeviceGraph, DeviceIndex},
    sid::SidAllocator,
};

/// Kind of a block device as reported by the system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceKind {
    Disk,
    Part,
    Mpath,
    Crypt,
    Lvm,
    #[default]
    #[serde(other)]
    Other,
}

fn default_block_size() -> u64 {
    SECTOR_SIZE
}

/// Snapshot of one block device of the system.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BlockDeviceInfo {
    /// Kernel device path, e.g. `/dev/sda1`.
    pub name: String,

    pub kind: BlockDeviceKind,

    /// Size in bytes.
    pub size: u64,

    #[serde(default = "default_block_size")]
    pub logical_block_size: u64,

    /// Start of a partition, in 512 byte sectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,

    #[serde(default)]
    pub rotational: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,

    /// Partition table type of a disk, or of the disk holding a partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pt_type: Option<PtType>,

    /// MBR partition id (`0x83`) or GPT partition type GUID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_type_id: Option<String>,

    /// Filesystem or container signature found on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    /// Device mapper name of dm devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_name: Option<String>,

    /// Names of the block devices this one is built on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl BlockDeviceInfo {
    pub fn signature(&self) -> Option<DetectedSignature> {
        self.signature.as_deref().map(DetectedSignature::from)
    }
}

/// Everything the probing pipeline consumes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SystemInfo {
    pub block_devices: Vec<BlockDeviceInfo>,
}

impl SystemInfo {
    pub fn block_device(&self, name: &str) -> Option<&BlockDeviceInfo> {
        self.block_devices.iter().find(|blk| blk.name == name)
    }

    /// Same as [`Self::block_device`] but fails for unknown names.
    pub fn find(&self, name: &str) -> Result<&BlockDeviceInfo, ProbeError> {
        self.block_device(name)
            .ok_or_else(|| ProbeError::UnknownBlockDevice(name.to_string()))
    }
}

/// Identifies a probed device during the pipeline. Devices that have no
/// block device of their own are keyed by the device they live on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeKey {
    BlockDevice(String),
    PartitionTable(String),
    PhysicalVolume(String),
    VolumeGroup(String),
    Filesystem(String),
}

impl Display for ProbeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKey::BlockDevice(name) => write!(f, "{name}"),
            ProbeKey::PartitionTable(name) => write!(f, "partition table on {name}"),
            ProbeKey::PhysicalVolume(name) => write!(f, "physical volume on {name}"),
            ProbeKey::VolumeGroup(name) => write!(f, "volume group {name}"),
            ProbeKey::Filesystem(name) => write!(f, "filesystem on {name}"),
        }
    }
}

/// Read access to the pipeline state during pass 2.
pub struct ProbeContext<'a> {
    info: &'a SystemInfo,
    keys: &'a BTreeMap<ProbeKey, DeviceIndex>,
}

impl<'a> ProbeContext<'a> {
    pub fn info(&self) -> &'a SystemInfo {
        self.info
    }

    /// Resolves the vertex of another probed device.
    pub fn lookup(&self, key: &ProbeKey, referrer: &ProbeKey) -> Result<DeviceIndex, ProbeError> {
        self.keys
            .get(key)
            .copied()
            .ok_or_else(|| ProbeError::UnknownParent {
                name: referrer.to_string(),
                parent: key.to_string(),
            })
    }
}

/// Decides which devices exist, with the attributes that determine the
/// variant.
fn discover(info: &SystemInfo) -> Result<Vec<(ProbeKey, DeviceKind)>, ProbeError> {
    let mut names = BTreeSet::new();
    let mut volume_groups = BTreeSet::new();
    let mut discovered: Vec<(ProbeKey, DeviceKind)> = Vec::new();

    for blk in &info.block_devices {
        if !names.insert(blk.name.as_str()) {
            return Err(ProbeError::DuplicateBlockDevice(blk.name.clone()));
        }

        let key = ProbeKey::BlockDevice(blk.name.clone());
        match blk.kind {
            BlockDeviceKind::Disk => discovered.push((key, Disk::default().into())),
            BlockDeviceKind::Mpath => discovered.push((key, Multipath::default().into())),
            BlockDeviceKind::Part => discovered.push((key, Partition::default().into())),
            BlockDeviceKind::Crypt => discovered.push((key, Encryption::default().into())),
            BlockDeviceKind::Lvm => {
                let dm_name = blk.dm_name.as_deref().ok_or(ProbeError::MissingAttribute {
                    name: blk.name.clone(),
                    attribute: "device mapper name",
                })?;
                let (vg_name, _) = split_lvm_name(dm_name)?;
                if volume_groups.insert(vg_name.clone()) {
                    discovered.push((
                        ProbeKey::VolumeGroup(vg_name.clone()),
                        LvmVg::new(vg_name).into(),
                    ));
                }
                discovered.push((key, LvmLv::default().into()));
            }
            BlockDeviceKind::Other => {
                debug!("Skipping block device '{}' of unsupported kind", blk.name);
                continue;
            }
        }

        if matches!(blk.kind, BlockDeviceKind::Disk | BlockDeviceKind::Mpath) {
            if let Some(pt_type) = blk.pt_type {
                discovered.push((
                    ProbeKey::PartitionTable(blk.name.clone()),
                    PartitionTable::new(pt_type).into(),
                ));
            }
        }

        match blk.signature() {
            Some(DetectedSignature::Container(ContainerSignature::LvmMember)) => discovered.push((
                ProbeKey::PhysicalVolume(blk.name.clone()),
                LvmPv::default().into(),
            )),
            Some(DetectedSignature::Filesystem(fs_type)) => discovered.push((
                ProbeKey::Filesystem(blk.name.clone()),
                Filesystem::new(fs_type).into(),
            )),
            _ => {}
        }
    }

    Ok(discovered)
}

/// Builds a devicegraph from system information.
pub fn probe(allocator: Arc<SidAllocator>, info: &SystemInfo) -> Result<DeviceGraph, ProbeError> {
    debug!(
        "Probing devicegraph from {} block devices",
        info.block_devices.len()
    );
    let mut graph = DeviceGraph::new(allocator);

    let mut keys = BTreeMap::new();
    let mut order = Vec::new();
    for (key, kind) in discover(info)? {
        let index = graph.create_device(kind)?;
        trace!("Discovered {key}");
        keys.insert(key.clone(), index);
        order.push((key, index));
    }

    trace!("Probing pass 1");
    for (key, index) in &order {
        let sid = graph.device(*index)?.sid();
        graph.device_kind_mut(sid)?.imp_mut().probe_pass_1(key, info)?;
    }

    trace!("Probing pass 2");
    let ctx = ProbeContext { info, keys: &keys };
    let mut holders = Vec::new();
    for (key, index) in &order {
        let device = graph.device(*index)?;
        for (parent, holder) in device.imp().probe_pass_2(key, &ctx)? {
            holders.push((parent, *index, holder));
        }
    }

    for (parent, child, holder) in holders {
        graph.add_edge(parent, child, holder)?;
    }

    graph.check()?;
    trace!("Probed devicegraph:\n{}", graph.describe());
    debug!(
        "Probed devicegraph with {} devices and {} holders",
        graph.num_devices(),
        graph.num_holders()
    );
    Ok(graph)
}
