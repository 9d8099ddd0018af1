use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{Action, ActionGraphBuilder, ActionKind, CommandRunner, ResizeMode, Tense},
    constants::{LVM_DEFAULT_EXTENT_SIZE, LVM_PV_METADATA_SIZE},
    devicegraph::{DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey, ResizeInfo},
    error::{ActionGraphError, CommitError, ProbeError},
    primitives::bytes::ByteCount,
};

use super::{parent_name, resize_verb, LvmVg};

/// LVM physical volume on a block device. All of its attributes live on the
/// block device below it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct LvmPv {}

impl LvmPv {
    /// Extent size of the volume group using this physical volume.
    fn extent_size(dev: DeviceRef<'_>) -> u64 {
        dev.children()
            .into_iter()
            .find_map(|child| child.as_variant::<LvmVg>())
            .map(|vg| vg.extent_size)
            .unwrap_or(LVM_DEFAULT_EXTENT_SIZE)
    }

    /// Bytes of the block device below the physical volume.
    pub fn blk_size(dev: DeviceRef<'_>) -> u64 {
        dev.parent()
            .and_then(|blk| blk.size())
            .unwrap_or_default()
    }

    /// Bytes usable for extents, in whole extents of `extent_size`.
    pub fn usable_size(dev: DeviceRef<'_>, extent_size: u64) -> u64 {
        let payload = Self::blk_size(dev).saturating_sub(LVM_PV_METADATA_SIZE);
        payload / extent_size * extent_size
    }
}

impl DeviceImpl for LvmPv {
    fn displayname(&self, dev: DeviceRef<'_>) -> String {
        parent_name(dev)
    }

    fn probe_pass_2(
        &self,
        key: &ProbeKey,
        ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        let ProbeKey::PhysicalVolume(name) = key else {
            return Ok(Vec::new());
        };

        let blk = ctx.lookup(&ProbeKey::BlockDevice(name.clone()), key)?;
        Ok(vec![(blk, Holder::User)])
    }

    /// Limits are those of the block device below: metadata plus at least one
    /// extent.
    fn detect_resize_info(&self, dev: DeviceRef<'_>) -> ResizeInfo {
        ResizeInfo::with_limits(LVM_PV_METADATA_SIZE + Self::extent_size(dev), u64::MAX)
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        if let Some(mode) = ResizeMode::between(Self::blk_size(lhs), Self::blk_size(rhs)) {
            builder.add_action(Action::new(rhs.sid(), ActionKind::resize(mode)));
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("pvcreate", &["--force", &parent_name(dev)])
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} physical volume on {}",
            tense.pick("Create", "Creating"),
            parent_name(dev)
        )
    }

    fn do_delete(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("pvremove", &["--force", &parent_name(dev)])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} physical volume on {}",
            tense.pick("Delete", "Deleting"),
            parent_name(dev)
        )
    }

    fn do_resize(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        mode: ResizeMode,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(rhs);
        match mode {
            ResizeMode::Grow => runner.run("pvresize", &[&blk]),
            ResizeMode::Shrink => {
                let size = format!("{}b", Self::blk_size(rhs));
                runner.run(
                    "pvresize",
                    &["--yes", "--setphysicalvolumesize", &size, &blk],
                )
            }
        }
    }

    fn do_resize_text(
        &self,
        lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        mode: ResizeMode,
        tense: Tense,
    ) -> String {
        format!(
            "{} physical volume on {} from {} to {}",
            resize_verb(mode, tense),
            parent_name(rhs),
            ByteCount(Self::blk_size(lhs)),
            ByteCount(Self::blk_size(rhs))
        )
    }
}
