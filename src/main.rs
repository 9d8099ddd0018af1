use std::process::ExitCode;

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info, LevelFilter};

use blkplan::{
    cli::{Cli, Commands},
    config::{PlannerConfig, ProbedSource},
    JsonFileLog, MultiLogger, Planner, BLKPLAN_VERSION,
};
use blkplan_api::devicegraph::{DeviceGraph, SidAllocator};

fn setup_logging(args: &Cli, config: &PlannerConfig) -> Result<(), Error> {
    let mut multilogger = MultiLogger::new()
        .with_logger(Box::new(
            env_logger::builder()
                .format_timestamp(None)
                .filter_level(args.verbosity)
                .build(),
        ))
        // The devicegraph is traced device by device; keep that out of
        // regular debug output.
        .with_target_filter("blkplan_api::devicegraph::probe", LevelFilter::Debug);

    if let Some(path) = &config.log_file {
        multilogger.add_logger(JsonFileLog::new(path).into_logger());
    }

    multilogger.init().context("Logger already registered")
}

/// Applies command line overrides to the configuration.
fn apply_overrides(config: &mut PlannerConfig, command: &Commands) {
    match command {
        Commands::Plan { probed, staging } => {
            if let Some(path) = probed {
                config.probed = ProbedSource::File(path.clone());
            }
            if staging.is_some() {
                config.staging.clone_from(staging);
            }
        }
        Commands::Commit {
            probed,
            staging,
            dry_run,
        } => {
            if let Some(path) = probed {
                config.probed = ProbedSource::File(path.clone());
            }
            if staging.is_some() {
                config.staging.clone_from(staging);
            }
            config.dry_run |= *dry_run;
        }
        Commands::Probe { .. } | Commands::Check { .. } => {}
    }
}

fn run(args: &Cli, config: PlannerConfig) -> Result<(), Error> {
    info!("blkplan version: {BLKPLAN_VERSION}");

    match &args.command {
        Commands::Probe { output } => {
            let planner = Planner::new(config);
            let graph = planner.probe_system()?;
            match output {
                Some(path) => graph
                    .save_to_file(path)
                    .with_context(|| format!("Failed to save devicegraph '{}'", path.display()))?,
                None => print!("{}", serde_yaml::to_string(&graph.save()?)?),
            }
        }

        Commands::Check { graph } => {
            let allocator = SidAllocator::starting_at(config.sid_start);
            let loaded = DeviceGraph::load_from_file(allocator.into(), graph)
                .with_context(|| format!("Failed to load devicegraph '{}'", graph.display()))?;
            loaded.check().context("Devicegraph is inconsistent")?;
            println!("{}", loaded.describe());
        }

        Commands::Plan { .. } => {
            let planner = Planner::new(config);
            let staging = planner.staging_graph()?;
            let probed = planner.probed_graph()?;
            for line in planner.plan(&probed, &staging)? {
                println!("{line}");
            }
        }

        Commands::Commit { .. } => {
            let planner = Planner::new(config);
            let staging = planner.staging_graph()?;
            let probed = planner.probed_graph()?;
            for command in planner.commit(&probed, &staging)? {
                println!("{command}");
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let config = PlannerConfig::load(args.config.as_deref());
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:?}");
            return ExitCode::from(1);
        }
    };
    apply_overrides(&mut config, &args.command);

    if let Err(e) = setup_logging(&args, &config) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = run(&args, config) {
        error!("'{}' failed: {e:?}", args.command);
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
