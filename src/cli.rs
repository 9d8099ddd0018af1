use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::BLKPLAN_VERSION;

#[derive(Parser, Debug)]
#[clap(version = BLKPLAN_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path to the planner configuration
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe the block devices of the system and save the devicegraph
    Probe {
        /// Where to save the devicegraph; printed to stdout when omitted
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a saved devicegraph and check its consistency
    Check {
        #[clap(index = 1)]
        graph: PathBuf,
    },

    /// Print the actions turning the probed devicegraph into the staging one
    Plan {
        /// Saved devicegraph to use instead of probing the system
        #[clap(long)]
        probed: Option<PathBuf>,

        /// Devicegraph describing the desired state
        #[clap(long)]
        staging: Option<PathBuf>,
    },

    /// Commit the actions turning the probed devicegraph into the staging one
    Commit {
        /// Saved devicegraph to use instead of probing the system
        #[clap(long)]
        probed: Option<PathBuf>,

        /// Devicegraph describing the desired state
        #[clap(long)]
        staging: Option<PathBuf>,

        /// Print the commands instead of running them
        #[clap(long)]
        dry_run: bool,
    },
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Commands::Probe { .. } => write!(f, "probe"),
            Commands::Check { .. } => write!(f, "check"),
            Commands::Plan { .. } => write!(f, "plan"),
            Commands::Commit { .. } => write!(f, "commit"),
        }
    }
}
