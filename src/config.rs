use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::debug;
use serde::{Deserialize, Serialize};

/// Default location of the planner configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blkplan/config.yaml";

/// Definition of the planner's configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlannerConfig {
    /// Where the devicegraph describing the current system comes from:
    /// `live`, or `file: <path>`.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub probed: ProbedSource,

    /// Saved devicegraph describing the desired state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<PathBuf>,

    /// First sid handed out to devices created in this process.
    #[serde(default = "default_sid_start")]
    pub sid_start: u32,

    /// Print the commands of a commit instead of running them.
    #[serde(default)]
    pub dry_run: bool,

    /// Optional JSON lines log of the whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_sid_start() -> u32 {
    42
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            probed: ProbedSource::default(),
            staging: None,
            sid_start: default_sid_start(),
            dry_run: false,
            log_file: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProbedSource {
    /// Probe the block devices of the running system.
    #[default]
    Live,

    /// Load a devicegraph saved by an earlier probe.
    File(PathBuf),
}

impl PlannerConfig {
    /// Loads the configuration from `path`. A missing file at the default
    /// location yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !required && !path.exists() {
            debug!("No configuration at '{}', using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration '{}'", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse configuration '{}'", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
