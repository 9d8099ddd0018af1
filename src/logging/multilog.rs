use std::collections::BTreeMap;

use log::{LevelFilter, Log, Metadata, Record};

/// Fans every record out to several loggers. Per-target filters apply to
/// all of them, on top of each logger's own level.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    max_level: LevelFilter,
    target_filters: BTreeMap<String, LevelFilter>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            max_level: LevelFilter::Trace,
            target_filters: BTreeMap::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Caps the level of records whose target starts with `target`.
    pub fn with_target_filter(mut self, target: &str, level: LevelFilter) -> Self {
        self.target_filters.insert(target.to_string(), level);
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger);
    }

    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }

    fn passes_filters(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.max_level {
            return false;
        }

        // The longest matching prefix wins.
        self.target_filters
            .iter()
            .filter(|(target, _)| metadata.target().starts_with(target.as_str()))
            .max_by_key(|(target, _)| target.len())
            .map_or(true, |(_, level)| metadata.level() <= *level)
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.passes_filters(metadata) && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if !self.passes_filters(record.metadata()) {
            return;
        }

        self.loggers
            .iter()
            .filter(|l| l.enabled(record.metadata()))
            .for_each(|l| l.log(record));
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use log::Level;

    #[derive(Default)]
    struct CountingLogger {
        enabled: bool,
        count: Arc<AtomicUsize>,
    }

    impl Log for CountingLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            self.enabled
        }

        fn log(&self, _: &Record) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }

        fn flush(&self) {}
    }

    fn counting(enabled: bool) -> (Box<CountingLogger>, Arc<AtomicUsize>) {
        let logger = Box::new(CountingLogger {
            enabled,
            ..Default::default()
        });
        let count = logger.count.clone();
        (logger, count)
    }

    fn record(target: &str, level: Level) -> Record<'_> {
        Record::builder().target(target).level(level).build()
    }

    #[test]
    fn test_enabled() {
        let (logger1, _) = counting(false);
        let (logger2, _) = counting(false);
        let multi_logger = MultiLogger::new().with_logger(logger1).with_logger(logger2);
        assert!(!multi_logger.enabled(&Metadata::builder().level(Level::Error).build()));

        let (logger1, _) = counting(false);
        let (logger2, _) = counting(true);
        let multi_logger = MultiLogger::new().with_logger(logger1).with_logger(logger2);
        assert!(multi_logger.enabled(&Metadata::builder().level(Level::Error).build()));
    }

    #[test]
    fn test_fan_out() {
        let (logger1, count1) = counting(true);
        let (logger2, count2) = counting(false);
        let multi_logger = MultiLogger::new()
            .with_logger(logger1)
            .with_logger(logger2)
            .with_max_level(LevelFilter::Info);

        multi_logger.log(&record("blkplan", Level::Info));
        multi_logger.log(&record("blkplan", Level::Debug));

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_target_filter() {
        let (logger, count) = counting(true);
        let multi_logger = MultiLogger::new()
            .with_logger(logger)
            .with_target_filter("blkplan_api", LevelFilter::Info)
            .with_target_filter("blkplan_api::actiongraph", LevelFilter::Trace);

        multi_logger.log(&record("blkplan_api::devicegraph", Level::Debug));
        assert_eq!(count.load(Ordering::Relaxed), 0);

        multi_logger.log(&record("blkplan_api::devicegraph", Level::Warn));
        multi_logger.log(&record("blkplan_api::actiongraph::builder", Level::Trace));
        multi_logger.log(&record("osutils::exe", Level::Trace));
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }
}
