use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{
        Action, ActionGraphBuilder, ActionIndex, ActionKind, CommandRunner, ReallotMode,
        ResizeMode, Side, Tense,
    },
    constants::LVM_DEFAULT_EXTENT_SIZE,
    devicegraph::{
        DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey,
        ResizeInfo, SystemInfo,
    },
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::{bytes::ByteCount, region::Region},
};

use super::{combine_children, create_child, resize_verb, split_lvm_name, LvmVg};

/// LVM logical volume. The region counts extents of the volume group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LvmLv {
    pub lv_name: String,
    pub region: Region,
}

impl LvmLv {
    /// Creates a logical volume of `size` bytes, rounded down to whole
    /// extents.
    pub fn create(
        graph: &mut DeviceGraph,
        vg: DeviceIndex,
        lv_name: impl Into<String>,
        size: u64,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let extent_size = graph.device(vg)?.variant::<LvmVg>()?.extent_size;
        let lv_name = lv_name.into();
        if lv_name.is_empty() || lv_name.starts_with('-') || lv_name.contains('/') {
            return Err(DeviceGraphError::InvalidName(lv_name));
        }

        let lv = LvmLv {
            lv_name,
            region: Region::new(0, size / extent_size, extent_size),
        };
        create_child(graph, vg, lv, Holder::Subdevice)
    }

    fn vg_name<'g>(dev: DeviceRef<'g>) -> &'g str {
        dev.parent()
            .and_then(|vg| vg.as_variant::<LvmVg>())
            .map(|vg| vg.vg_name.as_str())
            .unwrap_or_default()
    }

    /// `vg/lv` as the LVM tools address logical volumes.
    fn lvm_path(&self, dev: DeviceRef<'_>) -> String {
        format!("{}/{}", Self::vg_name(dev), self.lv_name)
    }

    /// Actions on the physical volumes and allotment of the volume group that
    /// change its free space in `mode`.
    fn vg_space_actions(
        builder: &ActionGraphBuilder<'_>,
        dev: DeviceRef<'_>,
        mode: ResizeMode,
    ) -> Vec<ActionIndex> {
        let Some(vg) = dev.parent() else {
            return Vec::new();
        };

        let mut sids = vec![vg.sid()];
        sids.extend(LvmVg::lvm_pvs(vg).into_iter().map(|pv| pv.sid()));

        sids.into_iter()
            .flat_map(|sid| builder.actions_with_sid(sid).iter().copied())
            .filter(|index| match (builder.action(*index).kind, mode) {
                (ActionKind::Reallot { mode: ReallotMode::Extend, .. }, ResizeMode::Grow)
                | (ActionKind::Reallot { mode: ReallotMode::Reduce, .. }, ResizeMode::Shrink) => {
                    true
                }
                (ActionKind::Resize { mode: resize, .. }, _) => resize == mode,
                _ => false,
            })
            .collect()
    }
}

impl DeviceImpl for LvmLv {
    fn displayname(&self, dev: DeviceRef<'_>) -> String {
        format!("/dev/{}/{}", Self::vg_name(dev), self.lv_name)
    }

    fn region(&self, _dev: DeviceRef<'_>) -> Option<Region> {
        Some(self.region)
    }

    fn probe_pass_1(&mut self, key: &ProbeKey, info: &SystemInfo) -> Result<(), ProbeError> {
        let ProbeKey::BlockDevice(name) = key else {
            return Ok(());
        };

        let blk = info.find(name)?;
        let dm_name = blk.dm_name.as_deref().ok_or(ProbeError::MissingAttribute {
            name: name.clone(),
            attribute: "device mapper name",
        })?;
        let (_, lv_name) = split_lvm_name(dm_name)?;

        self.lv_name = lv_name;
        self.region = Region::new(
            0,
            blk.size / LVM_DEFAULT_EXTENT_SIZE,
            LVM_DEFAULT_EXTENT_SIZE,
        );
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

        let blk = ctx.info().find(name)?;
        let dm_name = blk.dm_name.as_deref().ok_or(ProbeError::MissingAttribute {
            name: name.clone(),
            attribute: "device mapper name",
        })?;
        let (vg_name, _) = split_lvm_name(dm_name)?;
        let vg = ctx.lookup(&ProbeKey::VolumeGroup(vg_name), key)?;
        Ok(vec![(vg, Holder::Subdevice)])
    }

    /// A logical volume keeps at least one extent and can take all free
    /// extents of its volume group.
    fn detect_resize_info(&self, dev: DeviceRef<'_>) -> ResizeInfo {
        let free = dev
            .parent()
            .and_then(|vg| vg.as_variant::<LvmVg>().map(|data| data.free(vg)))
            .unwrap_or_default();

        let mut info = ResizeInfo::with_limits(
            self.region.block_size,
            self.region.size().saturating_add(free),
        );
        combine_children(&mut info, dev);
        info
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<LvmLv>()?;
        if let Some(mode) = ResizeMode::between(before.region.size(), self.region.size()) {
            builder.add_action(Action::new(rhs.sid(), ActionKind::resize(mode)));
        }

        if before.lv_name != self.lv_name {
            builder.add_action(Action::new(rhs.sid(), ActionKind::Rename));
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    /// Extents are taken from the volume group once it has grown and given
    /// back before it shrinks.
    fn add_dependencies(
        &self,
        action: ActionIndex,
        builder: &mut ActionGraphBuilder<'_>,
    ) -> Result<(), ActionGraphError> {
        let current = *builder.action(action);
        match current.kind {
            ActionKind::Create
            | ActionKind::Resize {
                mode: ResizeMode::Grow,
                ..
            } => {
                let dev = builder.device(current.sid, Side::Rhs)?;
                for index in Self::vg_space_actions(builder, dev, ResizeMode::Grow) {
                    builder.add_edge(index, action);
                }
            }

            ActionKind::Delete { .. }
            | ActionKind::Resize {
                mode: ResizeMode::Shrink,
                ..
            } => {
                let dev = builder.device(current.sid, Side::Lhs)?;
                for index in Self::vg_space_actions(builder, dev, ResizeMode::Shrink) {
                    builder.add_edge(action, index);
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let size = format!("{}b", self.region.size());
        runner.run(
            "lvcreate",
            &[
                "--yes",
                "--name",
                &self.lv_name,
                "--size",
                &size,
                Self::vg_name(dev),
            ],
        )
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} logical volume {} ({})",
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
        runner.run("lvremove", &["--yes", &self.lvm_path(dev)])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} logical volume {} ({})",
            tense.pick("Delete", "Deleting"),
            dev.displayname(),
            ByteCount(self.region.size())
        )
    }

    fn do_resize(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let size = format!("{}b", self.region.size());
        let path = lhs
            .as_variant::<LvmLv>()
            .map(|before| before.lvm_path(lhs))
            .unwrap_or_default();
        runner.run("lvresize", &["--yes", "--size", &size, &path])
    }

    fn do_resize_text(
        &self,
        lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        mode: ResizeMode,
        tense: Tense,
    ) -> String {
        format!(
            "{} logical volume {} from {} to {}",
            resize_verb(mode, tense),
            rhs.displayname(),
            ByteCount(lhs.size().unwrap_or_default()),
            ByteCount(self.region.size())
        )
    }

    fn do_rename(
        &self,
        lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let before = lhs
            .as_variant::<LvmLv>()
            .map(|lv| lv.lv_name.as_str())
            .unwrap_or_default();
        runner.run("lvrename", &[Self::vg_name(rhs), before, &self.lv_name])
    }

    fn do_rename_text(&self, lhs: DeviceRef<'_>, rhs: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} logical volume {} to {}",
            tense.pick("Rename", "Renaming"),
            lhs.displayname(),
            rhs.displayname()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sysdefs::units::{GIB, MIB};

    use crate::{
        devicegraph::SidAllocator,
        devices::{Disk, LvmVg},
    };

    use super::*;

    #[test]
    fn test_create_rounds_to_extents() {
        let mut graph = DeviceGraph::new(Arc::new(SidAllocator::starting_at(1)));
        let sda = Disk::create(&mut graph, "/dev/sda", Region::new(0, 2 * GIB / 512, 512)).unwrap();
        let vg = LvmVg::create(&mut graph, "system").unwrap();
        LvmVg::add_lvm_pv(&mut graph, vg, sda).unwrap();

        let lv = LvmLv::create(&mut graph, vg, "swap", GIB + 3 * MIB).unwrap();
        let dev = graph.device(lv).unwrap();
        assert_eq!(dev.displayname(), "/dev/system/swap");
        assert_eq!(dev.size(), Some(GIB));
        assert_eq!(dev.variant::<LvmLv>().unwrap().region.length, 256);

        let info = dev.detect_resize_info();
        assert!(info.resize_ok);
        assert_eq!(info.min_size, 4 * MIB);
        assert_eq!(info.max_size, 2 * GIB - 4 * MIB);

        assert!(matches!(
            LvmLv::create(&mut graph, sda, "data", GIB),
            Err(DeviceGraphError::WrongDeviceType { .. })
        ));
    }
}
