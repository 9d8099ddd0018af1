use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use sysdefs::units::SECTOR_SIZE;

use crate::{
    actiongraph::{
        Action, ActionGraphBuilder, ActionIndex, ActionKind, CommandRunner, ResizeMode, Side,
        Tense,
    },
    constants::{
        PARTITION_IDS_EXTENDED, PARTITION_ID_ESP, PARTITION_ID_LINUX, PARTITION_ID_LVM,
        PARTITION_ID_RAID, PARTITION_ID_SWAP,
    },
    devicegraph::{
        DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey,
        ResizeInfo, ResizeReasons, SystemInfo,
    },
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::{bytes::ByteCount, region::Region},
};

use super::{combine_children, create_child, resize_verb, PartitionTable, PtType};

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

/// GPT partition type GUIDs and the MBR ids they correspond to.
const GPT_TYPE_GUIDS: [(&str, u32); 5] = [
    ("0fc63daf-8483-4772-8e79-3d69d8477de4", PARTITION_ID_LINUX),
    ("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f", PARTITION_ID_SWAP),
    ("e6d6d379-f507-44c2-a23c-238f2a3df928", PARTITION_ID_LVM),
    ("c12a7328-f81f-11d2-ba4b-00a0c93ec93b", PARTITION_ID_ESP),
    ("a19d880f-05fc-4d3b-a006-743f0f84911e", PARTITION_ID_RAID),
];

/// Parses an MBR id (`0x8e`) or a GPT type GUID. Unknown values map to the
/// Linux native id.
fn parse_partition_id(value: Option<&str>) -> u32 {
    let Some(value) = value else {
        return PARTITION_ID_LINUX;
    };

    if let Some(hex) = value.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).unwrap_or(PARTITION_ID_LINUX);
    }

    GPT_TYPE_GUIDS
        .iter()
        .find(|(guid, _)| guid.eq_ignore_ascii_case(value))
        .map(|(_, id)| *id)
        .unwrap_or(PARTITION_ID_LINUX)
}

fn default_id() -> u32 {
    PARTITION_ID_LINUX
}

/// Number at the end of a partition device name, e.g. 3 for `/dev/nvme0n1p3`.
fn partition_number(name: &str) -> Option<u32> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    name[name.len() - digits..].parse().ok()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Partition {
    pub name: String,
    pub region: Region,
    #[serde(default)]
    pub partition_type: PartitionType,
    #[serde(default = "default_id")]
    pub id: u32,
}

impl Default for Partition {
    fn default() -> Self {
        Partition {
            name: String::new(),
            region: Region::default(),
            partition_type: PartitionType::default(),
            id: PARTITION_ID_LINUX,
        }
    }
}

impl Partition {
    pub fn new(name: impl Into<String>, region: Region, partition_type: PartitionType) -> Self {
        Partition {
            name: name.into(),
            region,
            partition_type,
            ..Default::default()
        }
    }

    /// Creates a partition on a partition table. The name must end with the
    /// partition number.
    pub fn create(
        graph: &mut DeviceGraph,
        table: DeviceIndex,
        name: impl Into<String>,
        region: Region,
        partition_type: PartitionType,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        graph.device(table)?.variant::<PartitionTable>()?;

        let partition = Partition::new(name, region, partition_type);
        if partition.number().is_none() {
            return Err(DeviceGraphError::InvalidName(partition.name));
        }

        create_child(graph, table, partition, Holder::Subdevice)
    }

    pub fn number(&self) -> Option<u32> {
        partition_number(&self.name)
    }

    fn number_arg(&self) -> String {
        self.number().unwrap_or_default().to_string()
    }

    fn table<'g>(dev: DeviceRef<'g>) -> Option<(DeviceRef<'g>, &'g PartitionTable)> {
        let table = dev.parent()?;
        Some((table, table.as_variant::<PartitionTable>()?))
    }

    /// Name of the disk holding the partition table.
    fn disk_name(dev: DeviceRef<'_>) -> String {
        Self::table(dev)
            .and_then(|(table, _)| table.parent())
            .map(|disk| disk.displayname())
            .unwrap_or_else(|| "<unknown>".into())
    }

    /// First block this partition cannot grow into: the start of the next
    /// partition on the same level, or the end of the usable space.
    fn limit(&self, dev: DeviceRef<'_>) -> Option<u64> {
        let (table, pt) = Self::table(dev)?;
        let usable = pt.usable_region(table)?;
        let siblings: Vec<&Partition> = table
            .children()
            .into_iter()
            .filter(|sibling| sibling.sid() != dev.sid())
            .filter_map(|sibling| sibling.as_variant::<Partition>())
            .collect();

        let mut end = usable.end();
        if self.partition_type == PartitionType::Logical {
            if let Some(extended) = siblings
                .iter()
                .find(|sibling| sibling.partition_type == PartitionType::Extended)
            {
                end = extended.region.end();
            }
        }

        let logical = self.partition_type == PartitionType::Logical;
        for sibling in siblings {
            let same_level = (sibling.partition_type == PartitionType::Logical) == logical;
            if same_level && sibling.region.start > self.region.start {
                end = end.min(sibling.region.start);
            }
        }
        Some(end)
    }

    /// Smallest size of an extended partition still holding all logical
    /// partitions.
    fn extended_min_size(&self, dev: DeviceRef<'_>) -> u64 {
        let Some((table, _)) = Self::table(dev) else {
            return 0;
        };

        table
            .children()
            .into_iter()
            .filter_map(|sibling| sibling.as_variant::<Partition>())
            .filter(|sibling| sibling.partition_type == PartitionType::Logical)
            .map(|logical| {
                self.region
                    .to_bytes(logical.region.end().saturating_sub(self.region.start))
            })
            .max()
            .unwrap_or(0)
    }

    fn type_arg(&self, pt_type: PtType) -> Option<String> {
        if self.partition_type == PartitionType::Extended {
            return None;
        }

        match pt_type {
            PtType::Msdos => Some(format!("{:#04x}", self.id)),
            PtType::Gpt => GPT_TYPE_GUIDS
                .iter()
                .find(|(_, id)| *id == self.id)
                .map(|(guid, _)| guid.to_string()),
        }
    }
}

impl DeviceImpl for Partition {
    fn displayname(&self, _dev: DeviceRef<'_>) -> String {
        self.name.clone()
    }

    fn region(&self, _dev: DeviceRef<'_>) -> Option<Region> {
        Some(self.region)
    }

    fn probe_pass_1(&mut self, key: &ProbeKey, info: &SystemInfo) -> Result<(), ProbeError> {
        let ProbeKey::BlockDevice(name) = key else {
            return Ok(());
        };

        let blk = info.find(name)?;
        let start = blk.start.ok_or(ProbeError::MissingAttribute {
            name: name.clone(),
            attribute: "start sector",
        })?;

        self.name = blk.name.clone();
        self.region = Region::new(
            start * SECTOR_SIZE / blk.logical_block_size,
            blk.size / blk.logical_block_size,
            blk.logical_block_size,
        );
        self.id = parse_partition_id(blk.partition_type_id.as_deref());
        self.partition_type = if PARTITION_IDS_EXTENDED.contains(&self.id) {
            PartitionType::Extended
        } else if blk.pt_type == Some(PtType::Msdos) && self.number().is_some_and(|n| n >= 5) {
            PartitionType::Logical
        } else {
            PartitionType::Primary
        };
        Ok(())
    }

    fn probe_pass_2(
        &self,
        key: &ProbeKey,
        ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        let ProbeKey::BlockDevice(name) = key else {
            return Ok(Vec::new());
        };

        let disk = ctx.info().find(name)?.parents.first().ok_or(
            ProbeError::MissingAttribute {
                name: name.clone(),
                attribute: "parent",
            },
        )?;
        let table = ctx.lookup(&ProbeKey::PartitionTable(disk.clone()), key)?;
        Ok(vec![(table, Holder::Subdevice)])
    }

    fn detect_resize_info(&self, dev: DeviceRef<'_>) -> ResizeInfo {
        let mut info = ResizeInfo::with_limits(self.region.block_size, u64::MAX);
        if self.partition_type == PartitionType::Extended {
            info.min_size = info.min_size.max(self.extended_min_size(dev));
        }

        if let Some(limit) = self.limit(dev) {
            info.max_size = self
                .region
                .to_bytes(limit.saturating_sub(self.region.start));
            if info.max_size <= self.region.size() {
                info.reasons |= ResizeReasons::NO_SPACE;
            }
        }

        combine_children(&mut info, dev);
        info
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<Partition>()?;
        if before.region.start != self.region.start {
            return Err(ActionGraphError::UnsupportedAction {
                sid: rhs.sid(),
                class: rhs.device_type(),
                action: "move",
            });
        }

        if let Some(mode) = ResizeMode::between(before.region.size(), self.region.size()) {
            builder.add_action(Action::new(rhs.sid(), ActionKind::resize(mode)));
        }

        if before.id != self.id {
            builder.add_action(Action::new(rhs.sid(), ActionKind::SetPartitionId));
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    /// Partitions are created or grown only once the partitions previously
    /// occupying the space are deleted or shrunk.
    fn add_dependencies(
        &self,
        action: ActionIndex,
        builder: &mut ActionGraphBuilder<'_>,
    ) -> Result<(), ActionGraphError> {
        let current = *builder.action(action);
        let takes_space = matches!(
            current.kind,
            ActionKind::Create
                | ActionKind::Resize {
                    mode: ResizeMode::Grow,
                    ..
                }
        );
        if !takes_space {
            return Ok(());
        }

        let rhs = builder.device(current.sid, Side::Rhs)?;
        let Some(table) = rhs.parent() else {
            return Ok(());
        };
        let Some(lhs_table) = builder.lhs().find_device(table.sid()) else {
            return Ok(());
        };

        for other in lhs_table.children() {
            if other.sid() == current.sid {
                continue;
            }
            let Some(partition) = other.as_variant::<Partition>() else {
                continue;
            };
            if !partition.region.overlaps(&self.region) {
                continue;
            }

            let frees_space: Vec<ActionIndex> = builder
                .actions_with_sid(other.sid())
                .iter()
                .copied()
                .filter(|index| {
                    matches!(
                        builder.action(*index).kind,
                        ActionKind::Delete { .. }
                            | ActionKind::Resize {
                                mode: ResizeMode::Shrink,
                                ..
                            }
                    )
                })
                .collect();
            for index in frees_space {
                builder.add_edge(index, action);
            }
        }
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = Self::disk_name(dev);
        let start = format!("{}s", self.region.start);
        let end = format!("{}s", self.region.end().saturating_sub(1));
        let partition_type: &str = self.partition_type.into();
        runner.run(
            "parted",
            &[
                "--script",
                "--align",
                "none",
                &disk,
                "unit",
                "s",
                "mkpart",
                partition_type,
                &start,
                &end,
            ],
        )?;

        match Self::table(dev).and_then(|(_, pt)| self.type_arg(pt.pt_type)) {
            Some(type_arg) if self.id != PARTITION_ID_LINUX => runner.run(
                "parted",
                &["--script", &disk, "type", &self.number_arg(), &type_arg],
            ),
            _ => Ok(()),
        }
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} partition {} ({})",
            tense.pick("Create", "Creating"),
            dev.displayname(),
            ByteCount(self.region.size())
        )
    }

    fn do_delete(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = Self::disk_name(dev);
        runner.run("parted", &["--script", &disk, "rm", &self.number_arg()])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} partition {} ({})",
            tense.pick("Delete", "Deleting"),
            dev.displayname(),
            ByteCount(self.region.size())
        )
    }

    fn do_resize(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = Self::disk_name(rhs);
        let end = format!("{}s", self.region.end().saturating_sub(1));
        runner.run(
            "parted",
            &[
                "--script",
                &disk,
                "unit",
                "s",
                "resizepart",
                &self.number_arg(),
                &end,
            ],
        )
    }

    fn do_resize_text(
        &self,
        lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        mode: ResizeMode,
        tense: Tense,
    ) -> String {
        format!(
            "{} partition {} from {} to {}",
            resize_verb(mode, tense),
            rhs.displayname(),
            ByteCount(lhs.size().unwrap_or_default()),
            ByteCount(self.region.size())
        )
    }

    fn do_set_partition_id(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let disk = Self::disk_name(rhs);
        match Self::table(rhs).and_then(|(_, pt)| self.type_arg(pt.pt_type)) {
            Some(type_arg) => runner.run(
                "parted",
                &["--script", &disk, "type", &self.number_arg(), &type_arg],
            ),
            None => Err(CommitError::CommandFailed {
                command: "parted type".into(),
                body: format!(
                    "no partition type for id {:#04x} on {}",
                    self.id,
                    rhs.displayname()
                ),
            }),
        }
    }

    fn do_set_partition_id_text(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        tense: Tense,
    ) -> String {
        format!(
            "{} id of partition {} to {:#04X}",
            tense.pick("Set", "Setting"),
            rhs.displayname(),
            self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_number() {
        assert_eq!(partition_number("/dev/sda1"), Some(1));
        assert_eq!(partition_number("/dev/nvme0n1p12"), Some(12));
        assert_eq!(partition_number("/dev/sda"), None);
    }

    #[test]
    fn test_parse_partition_id() {
        assert_eq!(parse_partition_id(None), PARTITION_ID_LINUX);
        assert_eq!(parse_partition_id(Some("0x8e")), PARTITION_ID_LVM);
        assert_eq!(parse_partition_id(Some("0x5")), 0x05);
        assert_eq!(
            parse_partition_id(Some("0657FD6D-A4AB-43C4-84E5-0933C84B4F4F")),
            PARTITION_ID_SWAP
        );
        assert_eq!(parse_partition_id(Some("garbage")), PARTITION_ID_LINUX);
    }

    #[test]
    fn test_type_arg() {
        let mut partition = Partition::new("/dev/sda1", Region::default(), PartitionType::Primary);
        partition.id = PARTITION_ID_LVM;
        assert_eq!(partition.type_arg(PtType::Msdos).as_deref(), Some("0x8e"));
        assert_eq!(
            partition.type_arg(PtType::Gpt).as_deref(),
            Some("e6d6d379-f507-44c2-a23c-238f2a3df928")
        );

        partition.partition_type = PartitionType::Extended;
        assert_eq!(partition.type_arg(PtType::Msdos), None);
    }
}
