use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{ActionGraphBuilder, ActionKind, CommandRunner, ReallotMode, Tense},
    constants::LVM_DEFAULT_EXTENT_SIZE,
    devicegraph::{DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey},
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::bytes::ByteCount,
};

use super::{create_child, parent_name, split_lvm_name, unused_blk_device, LvmLv, LvmPv};

fn default_extent_size() -> u64 {
    LVM_DEFAULT_EXTENT_SIZE
}

/// LVM volume group. Its parents are the physical volumes it consists of,
/// its children the logical volumes carved out of it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LvmVg {
    pub vg_name: String,
    #[serde(default = "default_extent_size")]
    pub extent_size: u64,
}

impl Default for LvmVg {
    fn default() -> Self {
        LvmVg::new(String::new())
    }
}

impl LvmVg {
    pub fn new(vg_name: impl Into<String>) -> Self {
        LvmVg {
            vg_name: vg_name.into(),
            extent_size: LVM_DEFAULT_EXTENT_SIZE,
        }
    }

    /// Creates an empty volume group.
    pub fn create(
        graph: &mut DeviceGraph,
        vg_name: impl Into<String>,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let vg_name = vg_name.into();
        if vg_name.is_empty() || vg_name.starts_with('-') || vg_name.contains('/') {
            return Err(DeviceGraphError::InvalidName(vg_name));
        }
        graph.create_device(LvmVg::new(vg_name))
    }

    /// Adds the block device `blk` to the volume group. A physical volume is
    /// created on `blk` unless one exists already.
    pub fn add_lvm_pv(
        graph: &mut DeviceGraph,
        vg: DeviceIndex,
        blk: DeviceIndex,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        graph.device(vg)?.variant::<LvmVg>()?;

        let existing = graph
            .device(blk)?
            .children()
            .into_iter()
            .find(|child| child.is::<LvmPv>())
            .map(|pv| (pv.index(), pv.num_children() > 0, pv.sid()));

        let pv = match existing {
            Some((_, true, sid)) => return Err(DeviceGraphError::DeviceInUse(sid)),
            Some((pv, false, _)) => pv,
            None => {
                unused_blk_device(graph, blk)?;
                create_child(graph, blk, LvmPv::default(), Holder::User)?
            }
        };

        graph.add_edge(pv, vg, Holder::User)?;
        Ok(pv)
    }

    /// Removes the physical volume on `blk` from the volume group and from
    /// the devicegraph.
    pub fn remove_lvm_pv(
        graph: &mut DeviceGraph,
        vg: DeviceIndex,
        blk: DeviceIndex,
    ) -> Result<(), DeviceGraphError> {
        let vg_dev = graph.device(vg)?;
        vg_dev.variant::<LvmVg>()?;

        let blk_dev = graph.device(blk)?;
        let pv = blk_dev
            .children()
            .into_iter()
            .find(|child| child.is::<LvmPv>() && graph.holder(child.index(), vg).is_some())
            .map(|pv| pv.index())
            .ok_or(DeviceGraphError::HolderNotFound {
                parent: blk_dev.sid(),
                child: vg_dev.sid(),
            })?;

        graph.remove_vertex(pv)?;
        Ok(())
    }

    /// Physical volumes of the volume group.
    pub fn lvm_pvs<'g>(dev: DeviceRef<'g>) -> Vec<DeviceRef<'g>> {
        dev.parents()
            .into_iter()
            .filter(|parent| parent.is::<LvmPv>())
            .collect()
    }

    /// Bytes available for logical volumes, in whole extents.
    pub fn size(&self, dev: DeviceRef<'_>) -> u64 {
        Self::lvm_pvs(dev)
            .into_iter()
            .map(|pv| LvmPv::usable_size(pv, self.extent_size))
            .sum()
    }

    /// Bytes allocated to logical volumes.
    pub fn used(&self, dev: DeviceRef<'_>) -> u64 {
        dev.children()
            .into_iter()
            .filter(|child| child.is::<LvmLv>())
            .filter_map(|lv| lv.size())
            .sum()
    }

    pub fn free(&self, dev: DeviceRef<'_>) -> u64 {
        self.size(dev).saturating_sub(self.used(dev))
    }

    fn pv_names(dev: DeviceRef<'_>) -> Vec<String> {
        Self::lvm_pvs(dev).into_iter().map(parent_name).collect()
    }
}

impl DeviceImpl for LvmVg {
    fn displayname(&self, _dev: DeviceRef<'_>) -> String {
        format!("/dev/{}", self.vg_name)
    }

    /// Volume groups are not block devices; their physical volumes are found
    /// through the parents of their logical volumes.
    fn probe_pass_2(
        &self,
        key: &ProbeKey,
        ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        let ProbeKey::VolumeGroup(vg_name) = key else {
            return Ok(Vec::new());
        };

        let mut pvs = BTreeSet::new();
        for blk in &ctx.info().block_devices {
            let Some(dm_name) = blk.dm_name.as_deref() else {
                continue;
            };
            if split_lvm_name(dm_name).ok().map(|(vg, _)| vg).as_ref() != Some(vg_name) {
                continue;
            }
            for parent in &blk.parents {
                pvs.insert(ctx.lookup(&ProbeKey::PhysicalVolume(parent.clone()), key)?);
            }
        }

        Ok(pvs.into_iter().map(|pv| (pv, Holder::User)).collect())
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<LvmVg>()?;
        if before.extent_size != self.extent_size {
            return Err(ActionGraphError::UnsupportedAction {
                sid: rhs.sid(),
                class: rhs.device_type(),
                action: "change extent size",
            });
        }

        if before.vg_name != self.vg_name {
            builder.add_chain(rhs.sid(), [ActionKind::Rename]);
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let extent_size = format!("{}k", self.extent_size / 1024);
        let pvs = Self::pv_names(dev);

        let mut args = vec![
            "--yes",
            "--physicalextentsize",
            extent_size.as_str(),
            self.vg_name.as_str(),
        ];
        args.extend(pvs.iter().map(String::as_str));
        runner.run("vgcreate", &args)
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} volume group {} ({}) from {}",
            tense.pick("Create", "Creating"),
            self.vg_name,
            ByteCount(self.size(dev)),
            Self::pv_names(dev).join(", ")
        )
    }

    fn do_delete(
        &self,
        _dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("vgremove", &["--force", &self.vg_name])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} volume group {} ({})",
            tense.pick("Delete", "Deleting"),
            self.vg_name,
            ByteCount(self.size(dev))
        )
    }

    fn do_rename(
        &self,
        lhs: DeviceRef<'_>,
        _rhs: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let before = lhs
            .as_variant::<LvmVg>()
            .map(|vg| vg.vg_name.as_str())
            .unwrap_or_default();
        runner.run("vgrename", &[before, &self.vg_name])
    }

    fn do_rename_text(&self, lhs: DeviceRef<'_>, _rhs: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} volume group {} to {}",
            tense.pick("Rename", "Renaming"),
            lhs.as_variant::<LvmVg>()
                .map(|vg| vg.vg_name.as_str())
                .unwrap_or_default(),
            self.vg_name
        )
    }

    fn do_reallot(
        &self,
        _dev: DeviceRef<'_>,
        mode: ReallotMode,
        peer: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(peer);
        match mode {
            ReallotMode::Extend => runner.run("vgextend", &[&self.vg_name, &blk]),
            ReallotMode::Reduce => runner.run("vgreduce", &[&self.vg_name, &blk]),
        }
    }

    fn do_reallot_text(
        &self,
        _dev: DeviceRef<'_>,
        mode: ReallotMode,
        peer: DeviceRef<'_>,
        tense: Tense,
    ) -> String {
        match mode {
            ReallotMode::Extend => format!(
                "{} volume group {} by {}",
                tense.pick("Extend", "Extending"),
                self.vg_name,
                parent_name(peer)
            ),
            ReallotMode::Reduce => format!(
                "{} volume group {} by {}",
                tense.pick("Reduce", "Reducing"),
                self.vg_name,
                parent_name(peer)
            ),
        }
    }
}
