use std::{path::Path, sync::Arc};

use anyhow::{bail, Context, Error};
use log::{debug, info};

use blkplan_api::{
    actiongraph::{ActionGraph, CommandRunner, RecordingRunner, Tense},
    devicegraph::{probe, DeviceGraph, SidAllocator, SystemInfo},
};
use osutils::{exe::SystemRunner, lsblk, udevadm};

use crate::config::{PlannerConfig, ProbedSource};

/// Drives one run: obtains the probed and staging devicegraphs, plans the
/// actions between them and commits them.
pub struct Planner {
    config: PlannerConfig,
    allocator: Arc<SidAllocator>,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        let allocator = Arc::new(SidAllocator::starting_at(config.sid_start));
        Self { config, allocator }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Populates a devicegraph from a system snapshot.
    pub fn probe_info(&self, info: &SystemInfo) -> Result<DeviceGraph, Error> {
        let graph = probe(self.allocator.clone(), info).context("Failed to probe devicegraph")?;
        info!("Probed {} devices", graph.num_devices());
        Ok(graph)
    }

    /// Probes the block devices of the running system.
    pub fn probe_system(&self) -> Result<DeviceGraph, Error> {
        let info = lsblk::system_info().context("Failed to list block devices")?;
        self.probe_info(&info)
    }

    pub fn load_graph(&self, path: &Path) -> Result<DeviceGraph, Error> {
        DeviceGraph::load_from_file(self.allocator.clone(), path)
            .with_context(|| format!("Failed to load devicegraph '{}'", path.display()))
    }

    /// The devicegraph of the current state, as configured.
    pub fn probed_graph(&self) -> Result<DeviceGraph, Error> {
        match &self.config.probed {
            ProbedSource::Live => self.probe_system(),
            ProbedSource::File(path) => self.load_graph(path),
        }
    }

    /// The devicegraph of the desired state.
    pub fn staging_graph(&self) -> Result<DeviceGraph, Error> {
        let Some(path) = &self.config.staging else {
            bail!("No staging devicegraph configured");
        };
        self.load_graph(path)
    }

    /// Describes the actions of a plan in commit order.
    pub fn plan(&self, probed: &DeviceGraph, staging: &DeviceGraph) -> Result<Vec<String>, Error> {
        let actions = build(probed, staging)?;
        Ok(actions.text(Tense::SimplePresent)?)
    }

    /// Commits a plan with the given runner.
    pub fn commit_with(
        &self,
        probed: &DeviceGraph,
        staging: &DeviceGraph,
        runner: &mut dyn CommandRunner,
    ) -> Result<usize, Error> {
        let actions = build(probed, staging)?;
        if actions.is_empty() {
            info!("Nothing to commit");
            return Ok(0);
        }

        info!("Committing {} actions", actions.num_actions());
        actions.commit(runner).context("Failed to commit actions")?;
        Ok(actions.num_actions())
    }

    /// Commits a plan, or only records its commands in dry run mode.
    /// Returns the commands that a dry run would have executed.
    pub fn commit(&self, probed: &DeviceGraph, staging: &DeviceGraph) -> Result<Vec<String>, Error> {
        if self.config.dry_run {
            let mut runner = RecordingRunner::new();
            self.commit_with(probed, staging, &mut runner)?;
            return Ok(runner.into_commands());
        }

        let mut runner = SystemRunner::new();
        self.commit_with(probed, staging, &mut runner)?;
        debug!("Ran {} commands", runner.executed());
        udevadm::settle()?;
        Ok(Vec::new())
    }
}

fn build<'g>(probed: &'g DeviceGraph, staging: &'g DeviceGraph) -> Result<ActionGraph<'g>, Error> {
    let actions = ActionGraph::build(probed, staging).context("Failed to build action graph")?;
    debug!(
        "Action graph has {} actions and {} dependencies:\n{}",
        actions.num_actions(),
        actions.num_dependencies(),
        actions.describe()
    );
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    use blkplan_api::devices::{Filesystem, Partition};
    use sysdefs::filesystems::FsType;

    fn sample_info() -> SystemInfo {
        serde_yaml::from_str(indoc! {r#"
            block-devices:
              - name: /dev/sda
                kind: disk
                size: 34359738368
                pt-type: gpt
              - name: /dev/sda1
                kind: part
                size: 1073741824
                start: 2048
                pt-type: gpt
                signature: ext4
                fs-label: boot
                mount-point: /boot
                parents: [/dev/sda]
        "#})
        .unwrap()
    }

    fn planner(dry_run: bool) -> Planner {
        Planner::new(PlannerConfig {
            sid_start: 1,
            dry_run,
            ..Default::default()
        })
    }

    #[test]
    fn test_plan_from_saved_graphs() {
        let planner = planner(true);
        let probed = planner.probe_info(&sample_info()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let probed_path = dir.path().join("probed.yaml");
        probed.save_to_file(&probed_path).unwrap();

        // Reloading keeps the sids, so the graphs compare as equal.
        let reloaded = planner.load_graph(&probed_path).unwrap();
        assert!(planner.plan(&probed, &reloaded).unwrap().is_empty());

        let mut staging = probed.clone();
        let sda1 = staging
            .devices()
            .find(|device| device.displayname() == "/dev/sda1")
            .unwrap();
        let fs = sda1.children()[0].sid();
        staging.variant_mut::<Filesystem>(fs).unwrap().label = "efi".into();

        assert_eq!(
            planner.plan(&probed, &staging).unwrap(),
            vec!["Set label of ext4 on /dev/sda1 to \"efi\""]
        );
    }

    #[test]
    fn test_dry_run_commit() {
        let planner = planner(true);
        let probed = planner.probe_info(&sample_info()).unwrap();

        let mut staging = probed.clone();
        let table = staging
            .devices()
            .find(|device| device.displayname() == "/dev/sda")
            .unwrap()
            .children()[0]
            .index();
        let region = blkplan_api::primitives::region::Region::new(2099200, 2097152, 512);
        let sda2 = Partition::create(
            &mut staging,
            table,
            "/dev/sda2",
            region,
            Default::default(),
        )
        .unwrap();
        Filesystem::create(&mut staging, sda2, FsType::Xfs).unwrap();

        let commands = planner.commit(&probed, &staging).unwrap();
        assert_eq!(
            commands,
            vec![
                "parted --script --align none /dev/sda unit s mkpart primary 2099200s 4196351s",
                "mkfs.xfs -f /dev/sda2",
            ]
        );

        assert_eq!(planner.commit(&probed, &probed).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_missing_staging() {
        let planner = planner(true);
        assert!(planner.staging_graph().is_err());
    }
}
