use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};
use sysdefs::units::SECTOR_SIZE;

use crate::{
    actiongraph::{ActionGraphBuilder, CommandRunner, Tense},
    constants::GPT_BACKUP_SECTORS,
    devicegraph::{DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey},
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::region::Region,
};

use super::{create_child, parent_name, unused_blk_device, Disk, Multipath};

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PtType {
    #[default]
    #[serde(alias = "dos")]
    Msdos,
    Gpt,
}

/// Partition table on a disk or multipath device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionTable {
    pub pt_type: PtType,
}

impl PartitionTable {
    pub fn new(pt_type: PtType) -> Self {
        PartitionTable { pt_type }
    }

    /// Creates a partition table on an unused disk or multipath device.
    pub fn create(
        graph: &mut DeviceGraph,
        device: DeviceIndex,
        pt_type: PtType,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let dev = unused_blk_device(graph, device)?;
        if !dev.is::<Disk>() && !dev.is::<Multipath>() {
            return Err(DeviceGraphError::WrongDeviceType {
                sid: dev.sid(),
                expected: "partitionable device".into(),
                actual: dev.device_type(),
            });
        }

        create_child(graph, device, PartitionTable::new(pt_type), Holder::Subdevice)
    }

    /// Blocks of the underlying device that partitions may occupy.
    pub fn usable_region(&self, dev: DeviceRef<'_>) -> Option<Region> {
        let mut region = dev.parent()?.region()?;
        if self.pt_type == PtType::Gpt {
            let backup = (GPT_BACKUP_SECTORS * SECTOR_SIZE).div_ceil(region.block_size);
            region.length = region.length.saturating_sub(backup);
        }
        Some(region)
    }

    fn label(&self) -> &'static str {
        match self.pt_type {
            PtType::Msdos => "MSDOS",
            PtType::Gpt => "GPT",
        }
    }
}

impl DeviceImpl for PartitionTable {
    fn displayname(&self, dev: DeviceRef<'_>) -> String {
        format!("{} on {}", self.label(), parent_name(dev))
    }

    fn probe_pass_2(
        &self,
        key: &ProbeKey,
        ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        let ProbeKey::PartitionTable(name) = key else {
            return Ok(Vec::new());
        };

        let index = ctx.lookup(&ProbeKey::BlockDevice(name.clone()), key)?;
        Ok(vec![(index, Holder::Subdevice)])
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<PartitionTable>()?;
        if before.pt_type != self.pt_type {
            return Err(ActionGraphError::UnsupportedAction {
                sid: lhs.sid(),
                class: lhs.device_type(),
                action: "change partition table type",
            });
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = parent_name(dev);
        let label: &str = self.pt_type.into();
        runner.run("parted", &["--script", &disk, "mklabel", label])
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} {} partition table on {}",
            tense.pick("Create", "Creating"),
            self.label(),
            parent_name(dev)
        )
    }

    fn do_delete(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = parent_name(dev);
        runner.run("wipefs", &["--all", &disk])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} {} partition table on {}",
            tense.pick("Delete", "Deleting"),
            self.label(),
            parent_name(dev)
        )
    }
}
