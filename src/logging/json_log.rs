use std::{
    fs::{self, File},
    io::Write,
    path::Path,
    sync::Mutex,
};

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};

/// Stage of a run a record belongs to, taken from the module that logged it.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Probe,
    Plan,
    Commit,
}

impl Phase {
    fn of(module: &str) -> Option<Self> {
        const PHASES: &[(&str, Phase)] = &[
            ("blkplan_api::devicegraph::probe", Phase::Probe),
            ("osutils::lsblk", Phase::Probe),
            ("blkplan_api::actiongraph::commit", Phase::Commit),
            ("osutils::exe", Phase::Commit),
            ("osutils::udevadm", Phase::Commit),
            ("blkplan_api::actiongraph", Phase::Plan),
        ];
        PHASES
            .iter()
            .find(|(prefix, _)| module.starts_with(prefix))
            .map(|(_, phase)| *phase)
    }
}

/// One line of the JSON log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LogEntry {
    timestamp: String,
    level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phase: Option<Phase>,
    message: String,
    /// `module:line` of the log statement.
    location: String,
}

impl LogEntry {
    fn new(record: &Record) -> Self {
        let module = record.module_path().unwrap_or(record.target());
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: record.level(),
            phase: Phase::of(module),
            message: record.args().to_string(),
            location: format!("{module}:{}", record.line().unwrap_or_default()),
        }
    }
}

/// Writes every record as one JSON object per line. A file that cannot be
/// created disables the logger instead of failing the run.
pub struct JsonFileLog {
    target: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl JsonFileLog {
    pub fn new(target: impl AsRef<Path>) -> Self {
        let target = target.as_ref();
        let file = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| File::create(target));

        let file = match file {
            Ok(f) => Some(Mutex::new(f)),
            Err(err) => {
                eprintln!(
                    "Logging setup error: failed to create log file '{}': {err}",
                    target.display()
                );
                None
            }
        };

        Self {
            target: file,
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        if let Some(file) = self.target.as_ref() {
            let mut serialized = serde_json::to_string(&LogEntry::new(record))?;
            serialized.push('\n');

            let mut file_lock = file.lock()?;
            file_lock.write_all(serialized.as_bytes())?;
        }
        Ok(())
    }
}

impl Log for JsonFileLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.target.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // Best effort.
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = self.target.as_ref().map(Mutex::lock) {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_filter() {
        let dir = tempdir().unwrap();
        let logger = JsonFileLog::new(dir.path().join("blkplan.jsonl"))
            .with_max_level(LevelFilter::Info)
            .into_logger();

        assert!(logger.enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_disabled() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as the log file.
        let log = JsonFileLog::new(dir.path());
        assert!(log.target.is_none());
        assert!(!log
            .into_logger()
            .enabled(&Metadata::builder().level(Level::Error).build()));
    }

    #[test]
    fn test_json_log() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("logs/blkplan.jsonl");
        let logger = JsonFileLog::new(&target).into_logger();

        for (message, module, line) in [
            ("Probed 4 devices", "blkplan::planner", 34),
            ("Scanning /dev/sda", "blkplan_api::devicegraph::probe", 80),
            ("Building action graph", "blkplan_api::actiongraph::builder", 162),
            ("Executing 'mkfs.xfs -f /dev/sda2'", "osutils::exe", 118),
        ] {
            logger.log(
                &Record::builder()
                    .args(format_args!("{message}"))
                    .level(Level::Info)
                    .target(module)
                    .module_path(Some(module))
                    .line(Some(line))
                    .build(),
            );
        }
        logger.flush();

        let content = fs::read_to_string(target).unwrap();
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].message, "Probed 4 devices");
        assert_eq!(entries[0].level, Level::Info);
        assert_eq!(entries[0].location, "blkplan::planner:34");
        assert!(chrono::DateTime::parse_from_rfc3339(&entries[0].timestamp).is_ok());

        let phases: Vec<Option<Phase>> = entries.iter().map(|entry| entry.phase).collect();
        assert_eq!(
            phases,
            [None, Some(Phase::Probe), Some(Phase::Plan), Some(Phase::Commit)]
        );
        // Records outside of a phase carry no phase at all.
        assert!(!content.lines().next().unwrap().contains("phase"));
    }

    #[test]
    fn test_phase() {
        assert_eq!(
            Phase::of("blkplan_api::actiongraph::commit"),
            Some(Phase::Commit)
        );
        assert_eq!(Phase::of("blkplan_api::actiongraph::graph"), Some(Phase::Plan));
        assert_eq!(Phase::of("osutils::lsblk"), Some(Phase::Probe));
        assert_eq!(Phase::of("blkplan_api::devicegraph::graph"), None);
    }
}
