use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::Tense,
    devicegraph::{DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, ProbeKey, SystemInfo},
    error::{DeviceGraphError, ProbeError},
    primitives::{bytes::ByteCount, region::Region},
};

/// A physical disk. Disks can be neither created nor deleted, so their
/// create and delete effects stay stubs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Disk {
    pub name: String,
    pub region: Region,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
}

impl Disk {
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Disk {
            name: name.into(),
            region,
            ..Default::default()
        }
    }

    pub fn create(
        graph: &mut DeviceGraph,
        name: impl Into<String>,
        region: Region,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        graph.create_device(Disk::new(name, region))
    }
}

impl DeviceImpl for Disk {
    fn displayname(&self, _dev: DeviceRef<'_>) -> String {
        self.name.clone()
    }

    fn region(&self, _dev: DeviceRef<'_>) -> Option<Region> {
        Some(self.region)
    }

    fn probe_pass_1(&mut self, key: &ProbeKey, info: &SystemInfo) -> Result<(), ProbeError> {
        if let ProbeKey::BlockDevice(name) = key {
            let blk = info.find(name)?;
            self.name = blk.name.clone();
            self.region = Region::new(
                0,
                blk.size / blk.logical_block_size,
                blk.logical_block_size,
            );
            self.rotational = blk.rotational;
            self.transport = blk.transport.clone();
        }
        Ok(())
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} disk {} ({})",
            tense.pick("Create", "Creating"),
            dev.displayname(),
            ByteCount(self.region.size())
        )
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} disk {}",
            tense.pick("Delete", "Deleting"),
            dev.displayname()
        )
    }
}
