use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{Action, ActionGraphBuilder, ActionKind, CommandRunner, ResizeMode, Side, Tense},
    constants::{DEV_MAPPER_PATH, LUKS_HEADER_SIZE},
    devicegraph::{
        DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey,
        ResizeInfo, SystemInfo,
    },
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::{bytes::ByteCount, region::Region},
};

use super::{create_child, parent_name, resize_verb, unused_blk_device};

/// LUKS encryption on a block device. The payload is the block device minus
/// the LUKS header, so its region always follows the device below.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Encryption {
    pub dm_table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
}

impl Encryption {
    pub fn new(dm_table_name: impl Into<String>) -> Self {
        Encryption {
            dm_table_name: dm_table_name.into(),
            key_file: None,
        }
    }

    /// Encrypts an unused block device.
    pub fn create(
        graph: &mut DeviceGraph,
        blk: DeviceIndex,
        dm_table_name: impl Into<String>,
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let dm_table_name = dm_table_name.into();
        if dm_table_name.is_empty() || dm_table_name.contains('/') {
            return Err(DeviceGraphError::InvalidName(dm_table_name));
        }

        unused_blk_device(graph, blk)?;
        create_child(graph, blk, Encryption::new(dm_table_name), Holder::User)
    }

    fn key_file_args(&self) -> Vec<&str> {
        match &self.key_file {
            Some(key_file) => vec!["--key-file", key_file.as_str()],
            None => Vec::new(),
        }
    }

    fn blk_size(dev: DeviceRef<'_>) -> u64 {
        dev.parent()
            .and_then(|blk| blk.size())
            .unwrap_or_default()
    }
}

impl DeviceImpl for Encryption {
    fn displayname(&self, _dev: DeviceRef<'_>) -> String {
        format!("{DEV_MAPPER_PATH}/{}", self.dm_table_name)
    }

    fn region(&self, dev: DeviceRef<'_>) -> Option<Region> {
        let blk = dev.parent()?.region()?;
        let header = blk.to_blocks(LUKS_HEADER_SIZE);
        Some(Region::new(
            0,
            blk.length.saturating_sub(header),
            blk.block_size,
        ))
    }

    fn probe_pass_1(&mut self, key: &ProbeKey, info: &SystemInfo) -> Result<(), ProbeError> {
        if let ProbeKey::BlockDevice(name) = key {
            let blk = info.find(name)?;
            self.dm_table_name = match &blk.dm_name {
                Some(dm_name) => dm_name.clone(),
                None => name.rsplit('/').next().unwrap_or(name).to_string(),
            };
        }
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
        let parent = blk.parents.first().ok_or(ProbeError::MissingAttribute {
            name: name.clone(),
            attribute: "parent",
        })?;
        let index = ctx.lookup(&ProbeKey::BlockDevice(parent.clone()), key)?;
        Ok(vec![(index, Holder::User)])
    }

    /// Limits are those of the block device below: the header plus the
    /// limits of the contents.
    fn detect_resize_info(&self, dev: DeviceRef<'_>) -> ResizeInfo {
        let block_size = dev.region().map(|region| region.block_size).unwrap_or(512);
        let mut info = ResizeInfo::with_limits(LUKS_HEADER_SIZE + block_size, u64::MAX);
        for child in dev.children() {
            let mut extra = child.detect_resize_info();
            extra.shift(LUKS_HEADER_SIZE);
            info.combine(&extra);
        }
        info.check();
        info
    }

    fn add_create_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        builder.add_chain(
            dev.sid(),
            [ActionKind::Create, ActionKind::Activate { side: Side::Rhs }],
        );
        Ok(())
    }

    fn add_delete_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        builder.add_chain(
            dev.sid(),
            [
                ActionKind::Deactivate { side: Side::Lhs },
                ActionKind::Delete {
                    only_in_devicegraph: false,
                },
            ],
        );
        Ok(())
    }

    fn add_modify_actions<'g>(
        &self,
        lhs: DeviceRef<'g>,
        rhs: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        let before = lhs.variant::<Encryption>()?;
        if before.dm_table_name != self.dm_table_name {
            return Err(ActionGraphError::UnsupportedAction {
                sid: rhs.sid(),
                class: rhs.device_type(),
                action: "rename",
            });
        }

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
        let blk = parent_name(dev);
        let mut args = vec!["--batch-mode", "luksFormat"];
        args.extend(self.key_file_args());
        args.push(&blk);
        runner.run("cryptsetup", &args)
    }

    fn do_create_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} encryption layer device on {}",
            tense.pick("Create", "Creating"),
            parent_name(dev)
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
            "{} encryption layer device on {}",
            tense.pick("Delete", "Deleting"),
            parent_name(dev)
        )
    }

    fn do_activate(
        &self,
        dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let blk = parent_name(dev);
        let mut args = vec!["open"];
        args.extend(self.key_file_args());
        args.push(&blk);
        args.push(&self.dm_table_name);
        runner.run("cryptsetup", &args)
    }

    fn do_activate_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} encryption layer device on {} as {}",
            tense.pick("Activate", "Activating"),
            parent_name(dev),
            dev.displayname()
        )
    }

    fn do_deactivate(
        &self,
        _dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("cryptsetup", &["close", &self.dm_table_name])
    }

    fn do_deactivate_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} encryption layer device {}",
            tense.pick("Deactivate", "Deactivating"),
            dev.displayname()
        )
    }

    fn do_resize(
        &self,
        _lhs: DeviceRef<'_>,
        rhs: DeviceRef<'_>,
        _mode: ResizeMode,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        let sectors = rhs
            .region()
            .map(|region| (region.size() / 512).to_string())
            .unwrap_or_default();
        runner.run(
            "cryptsetup",
            &["resize", "--size", &sectors, &self.dm_table_name],
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
            "{} encryption layer device {} from {} to {}",
            resize_verb(mode, tense),
            rhs.displayname(),
            ByteCount(lhs.size().unwrap_or_default()),
            ByteCount(rhs.size().unwrap_or_default())
        )
    }
}
