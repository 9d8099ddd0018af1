use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    actiongraph::{ActionGraphBuilder, ActionKind, CommandRunner, Side, Tense},
    devicegraph::{
        DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ProbeContext, ProbeKey,
        SystemInfo,
    },
    error::{ActionGraphError, CommitError, DeviceGraphError, ProbeError},
    primitives::region::Region,
};

/// A multipath device combining several paths to the same disk.
///
/// Multipath devices are assembled by the system; they cannot be created.
/// Deleting one only flushes the map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Multipath {
    pub name: String,
    pub region: Region,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub rotational: bool,
}

impl Multipath {
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Multipath {
            name: name.into(),
            region,
            ..Default::default()
        }
    }

    /// Creates a multipath device on top of `paths`, which may be empty.
    pub fn create(
        graph: &mut DeviceGraph,
        name: impl Into<String>,
        region: Region,
        paths: &[DeviceIndex],
    ) -> Result<DeviceIndex, DeviceGraphError> {
        let index = graph.create_device(Multipath::new(name, region))?;
        for path in paths {
            graph.add_edge(*path, index, Holder::User)?;
        }
        Ok(index)
    }

    fn map_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl DeviceImpl for Multipath {
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
            self.vendor = blk.vendor.clone().unwrap_or_default();
            self.model = blk.model.clone().unwrap_or_default();
            self.rotational = blk.rotational;
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

        ctx.info()
            .find(name)?
            .parents
            .iter()
            .map(|path| {
                let index = ctx.lookup(&ProbeKey::BlockDevice(path.clone()), key)?;
                Ok((index, Holder::User))
            })
            .collect()
    }

    fn add_create_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        _builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        Err(ActionGraphError::UnsupportedAction {
            sid: dev.sid(),
            class: dev.device_type(),
            action: "create",
        })
    }

    fn add_delete_actions<'g>(
        &self,
        dev: DeviceRef<'g>,
        builder: &mut ActionGraphBuilder<'g>,
    ) -> Result<(), ActionGraphError> {
        trace!("Multipath {} is only flushed", self.name);
        builder.add_chain(
            dev.sid(),
            [
                ActionKind::Deactivate { side: Side::Lhs },
                ActionKind::Delete {
                    only_in_devicegraph: true,
                },
            ],
        );
        Ok(())
    }

    fn do_deactivate(
        &self,
        _dev: DeviceRef<'_>,
        runner: &mut dyn CommandRunner,
    ) -> Result<(), CommitError> {
        runner.run("multipath", &["-f", self.map_name()])
    }

    fn do_deactivate_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} multipath device {}",
            tense.pick("Deactivate", "Deactivating"),
            dev.displayname()
        )
    }

    fn do_delete_text(&self, dev: DeviceRef<'_>, tense: Tense) -> String {
        format!(
            "{} multipath device {} from the devicegraph",
            tense.pick("Remove", "Removing"),
            dev.displayname()
        )
    }
}
