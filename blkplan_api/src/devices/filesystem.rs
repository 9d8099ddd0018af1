use std::path::Path;

use serde::{Deserialize, Serialize};
use sysdefs::filesystems::FsType;

use crate::{
    actiongraph::{
        Action, ActionGraphBuilder, ActionIndex, ActionKind, ActionTag, CommandRunner,
        ResizeMode, Side, Tense,
    },
    devicegraph::{
        stub, DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey,
        ResizeInfo, ResizeReasons, Sid, SystemInfo,
    },
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::bytes::ByteCount,
};

use super::{create_child, parent_name, resize_verb, unused_blk_device};

/// Filesystem (or swap space) directly on a block device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Filesystem {
    pub fs_type: FsType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

impl Filesystem {
    pub fn new(fs_type: FsType) -> Self {
        Filesystem {
            fs_type,
            label: String::new(),
            uuid: String::new(),
            mount_point: None,
        }
    }

    /// Creates a filesystem on an unused block device.
    pub fn create(
        graph: &mut DeviceGraph,
        blk: DeviceIndex,
        fs_type: FsType,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        unused_blk_device(graph, blk)?;
        create_child(graph, blk, Filesystem::new(fs_type), Holder::User)
    }

    fn blk_size(dev: DeviceRef<'_>) -> u64 {
        dev.parent()
            .and_then(|blk| blk.size())
            .unwrap_or_default()
    }

    /// Mount point of the filesystem on `side`, if it has one.
    fn mount_point_on<'g>(
        builder: &ActionGraphBuilder<'g>,
        sid: Sid,
        side: Side,
    ) -> Option<&'g str> {
        builder
            .device(sid, side)
            .ok()?
            .as_variant::<Filesystem>()?
            .mount_point
            .as_deref()
    }

    fn mkfs_args(&self) -> (String, Vec<&str>) {
        let (program, force, label_flag) = match self.fs_type {
            FsType::Swap => ("mkswap".to_string(), "-f", "-L"),
            FsType::Vfat => ("mkfs.vfat".to_string(), "-I", "-n"),
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 | FsType::Ntfs => {
                (format!("mkfs.{}", self.fs_type), "-F", "-L")
            }
            FsType::Xfs | FsType::Btrfs => (format!("mkfs.{}", self.fs_type), "-f", "-L"),
        };

        let mut args = vec![force];
        if !self.label.is_empty() {
            args.extend([label_flag, self.label.as_str()]);
        }
        (program, args)
    }
}

/// Whether `path` lies strictly below `ancestor`.
fn is_nested_in(path: &str, ancestor: &str) -> bool {
    path != ancestor && Path::new(path).starts_with(ancestor)
}

impl DeviceImpl for Filesystem {
    fn displayname(&self, dev: DeviceRef<'_>) -> String {
        format!("{} on {}", self.fs_type, parent_name(dev))
    }

    fn probe_pass_1(&mut self, key: &ProbeKey, info: &SystemInfo) -> Result<(), ProbeError> {
        if let ProbeKey::Filesystem(name) = key {
            let blk = info.find(name)?;
            self.label = blk.fs_label.clone().unwrap_or_default();
            self.uuid = blk.fs_uuid.clone().unwrap_or_default();
            self.mount_point = blk.mount_point.clone();
        }
        Ok(())
    }

    fn probe_pass_2(
        &self,
        key: &ProbeKey,
        ctx: &ProbeContext<'_>,
    ) -> Result<Vec<(DeviceIndex, Holder)>, ProbeError> {
        let ProbeKey::Filesystem(name) = key else {
            return Ok(Vec::new());
        };

        let blk = ctx.lookup(&ProbeKey::BlockDevice(name.clone()), key)?;
        Ok(vec![(blk, Holder::User)])
    }

    /// Limits apply to the block device holding the filesystem.
    fn detect_resize_info(&self, dev: DeviceRef<'_>) -> ResizeInfo {
        let size = Self::blk_size(dev);
        let mut info = ResizeInfo::with_limits(self.fs_type.min_size(), self.fs_type.max_size());

        if !self.fs_type.supports_shrink() {
            info.min_size = info.min_size.max(size);
            info.reasons |= ResizeReasons::FS_NO_SHRINK;
        }

        if !self.fs_type.supports_grow() {
            info.max_size = size;
            info.reasons |= ResizeReasons::FS_NO_GROW;
        }

        if !self.fs_type.supports_shrink() && !self.fs_type.supports_grow() {
            info.resize_ok = false;
        }

        info.check();
        info
    }

    fn add_create_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let mut chain = vec![ActionKind::Create];
        if self.mount_point.is_some() {
            chain.push(ActionKind::Mount { side: Side::Rhs });
        }
        builder.add_chain(dev.sid(), chain);
        Ok(())
    }

    fn add_delete_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let mut chain = Vec::new();
        if self.mount_point.is_some() {
            chain.push(ActionKind::Unmount { side: Side::Lhs });
        }
        chain.push(ActionKind::Delete {
            only_in_devicegraph: false,
        });
        builder.add_chain(dev.sid(), chain);
        Ok(())
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<Filesystem>()?;
        if before.fs_type != self.fs_type {
            return Err(ActionGraphError::UnsupportedAction {
                sid: rhs.sid(),
                class: rhs.device_type(),
                action: "change filesystem type",
            });
        }

        if let Some(mode) = ResizeMode::between(Self::blk_size(lhs), Self::blk_size(rhs)) {
            let supported = match mode {
                ResizeMode::Shrink => self.fs_type.supports_shrink(),
                ResizeMode::Grow => self.fs_type.supports_grow(),
            };
            if !supported {
                return Err(ActionGraphError::UnsupportedAction {
                    sid: rhs.sid(),
                    class: rhs.device_type(),
                    action: match mode {
                        ResizeMode::Shrink => "shrink",
                        ResizeMode::Grow => "grow",
                    },
                });
            }
            builder.add_action(Action::new(rhs.sid(), ActionKind::resize(mode)));
        }

        if before.label != self.label {
            builder.add_action(Action::new(rhs.sid(), ActionKind::SetLabel));
        }

        if before.mount_point != self.mount_point {
            let mut chain = Vec::new();
            if before.mount_point.is_some() {
                chain.push(ActionKind::Unmount { side: Side::Lhs });
            }
            if self.mount_point.is_some() {
                chain.push(ActionKind::Mount { side: Side::Rhs });
            }
            builder.add_chain(rhs.sid(), chain);
        }

        builder.add_reallot_actions(lhs, rhs);
        Ok(())
    }

    /// Nested mount points are mounted after and unmounted before the mount
    /// point they live in. A mount point is only mounted again once the
    /// filesystem previously mounted there is unmounted.
    fn add_dependencies(
        &self,
        action: ActionIndex,
        builder: &mut ActionGraphBuilder<'_>,
    ) -> Result<(), ActionGraphError> {
        let current = *builder.action(action);
        let mut before = Vec::new();
        let mut after = Vec::new();

        match current.kind {
            ActionKind::Mount { side } => {
                let Some(path) = Self::mount_point_on(builder, current.sid, side) else {
                    return Ok(());
                };

                for other in builder.actions_with_tag(ActionTag::Mount) {
                    let other_action = builder.action(*other);
                    if let ActionKind::Mount { side } = other_action.kind {
                        if Self::mount_point_on(builder, other_action.sid, side)
                            .is_some_and(|ancestor| is_nested_in(path, ancestor))
                        {
                            before.push(*other);
                        }
                    }
                }

                for other in builder.actions_with_tag(ActionTag::Unmount) {
                    let other_action = builder.action(*other);
                    if other_action.sid == current.sid {
                        continue;
                    }
                    if let ActionKind::Unmount { side } = other_action.kind {
                        if Self::mount_point_on(builder, other_action.sid, side) == Some(path) {
                            before.push(*other);
                        }
                    }
                }
            }

            ActionKind::Unmount { side } => {
                let Some(path) = Self::mount_point_on(builder, current.sid, side) else {
                    return Ok(());
                };

                for other in builder.actions_with_tag(ActionTag::Unmount) {
                    let other_action = builder.action(*other);
                    if let ActionKind::Unmount { side } = other_action.kind {
                        if Self::mount_point_on(builder, other_action.sid, side)
                            .is_some_and(|ancestor| is_nested_in(path, ancestor))
                        {
                            after.push(*other);
                        }
                    }
                }
            }

            _ => {}
        }

        for other in before {
            builder.add_edge(other, action);
        }
        for other in after {
            builder.add_edge(action, other);
        }
        Ok(())
    }

    fn do_create(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(dev);
        let (program, mut args) = self.mkfs_args();
        args.push(&blk);
        runner.run(&program, &args)
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        let what = match self.fs_type {
            FsType::Swap => "swap".to_string(),
            fs_type => format!("{fs_type} filesystem"),
        };
        format!(
            "{} {} on {} ({})",
            tense.pick("Create", "Creating"),
            what,
            parent_name(dev),
            ByteCount(Self::blk_size(dev))
        )
    }

    fn do_delete(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("wipefs", &["--all", &parent_name(dev)])
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} {} on {}",
            tense.pick("Delete", "Deleting"),
            self.fs_type,
            parent_name(dev)
        )
    }

    fn do_mount(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(dev);
        if !self.fs_type.is_mountable() {
            return runner.run("swapon", &[&blk]);
        }

        let Some(mount_point) = self.mount_point.as_deref() else {
            return Err(stub(dev, "do_mount"));
        };
        let fs_type: &str = self.fs_type.into();
        runner.run("mount", &["-t", fs_type, &blk, mount_point])
    }

    fn do_mount_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        if !self.fs_type.is_mountable() {
            return format!(
                "{} swap on {}",
                tense.pick("Activate", "Activating"),
                parent_name(dev)
            );
        }
        format!(
            "{} {} at {}",
            tense.pick("Mount", "Mounting"),
            parent_name(dev),
            self.mount_point.as_deref().unwrap_or_default()
        )
    }

    fn do_unmount(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(dev);
        if !self.fs_type.is_mountable() {
            return runner.run("swapoff", &[&blk]);
        }

        let Some(mount_point) = self.mount_point.as_deref() else {
            return Err(stub(dev, "do_unmount"));
        };
        runner.run("umount", &[mount_point])
    }

    fn do_unmount_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        if !self.fs_type.is_mountable() {
            return format!(
                "{} swap on {}",
                tense.pick("Deactivate", "Deactivating"),
                parent_name(dev)
            );
        }
        format!(
            "{} {} at {}",
            tense.pick("Unmount", "Unmounting"),
            parent_name(dev),
            self.mount_point.as_deref().unwrap_or_default()
        )
    }

    fn do_resize(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(rhs);
        let size = Self::blk_size(rhs);
        let target = self.mount_point.as_deref().unwrap_or(&blk);

        match self.fs_type {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => {
                let size = format!("{}K", size / 1024);
                runner.run("resize2fs", &[&blk, &size])
            }
            FsType::Xfs => runner.run("xfs_growfs", &[target]),
            FsType::Btrfs => {
                let size = size.to_string();
                runner.run("btrfs", &["filesystem", "resize", &size, target])
            }
            FsType::Swap => {
                let mut args = vec!["-f"];
                if !self.label.is_empty() {
                    args.extend(["-L", self.label.as_str()]);
                }
                if !self.uuid.is_empty() {
                    args.extend(["-U", self.uuid.as_str()]);
                }
                args.push(&blk);
                runner.run("mkswap", &args)
            }
            FsType::Ntfs | FsType::Vfat => Err(stub(rhs, "do_resize")),
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
            "{} {} on {} from {} to {}",
            resize_verb(mode, tense),
            self.fs_type,
            parent_name(rhs),
            ByteCount(Self::blk_size(lhs)),
            ByteCount(Self::blk_size(rhs))
        )
    }

    fn do_set_label(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(rhs);
        let label = self.label.as_str();
        match self.fs_type {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => runner.run("e2label", &[&blk, label]),
            FsType::Xfs => runner.run("xfs_admin", &["-L", label, &blk]),
            FsType::Btrfs => runner.run("btrfs", &["filesystem", "label", &blk, label]),
            FsType::Swap => runner.run("swaplabel", &["-L", label, &blk]),
            FsType::Vfat => runner.run("fatlabel", &[&blk, label]),
            FsType::Ntfs => runner.run("ntfslabel", &[&blk, label]),
        }
    }

    fn do_set_label_text(&self, _lhs: DeviceRef<'_>, rhs: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} label of {} on {} to \"{}\"",
            tense.pick("Set", "Setting"),
            self.fs_type,
            parent_name(rhs),
            self.label
        )
    }
}
