use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_rolling_file::RollingFileAppenderBase;
use tracing_subscriber::{
    Layer, Registry, filter::Targets, fmt::writer::MakeWriterExt, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{
    config::{Config, ConfigPrefix},
    error::BootstrapError,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging section of the configuration.
///
/// Loggers map a name to a tracing target and a level; appenders pick the
/// loggers they write by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    loggers: Vec<Logger>,
    console_appender: Option<ConsoleAppenderConfig>,
    file_appenders: Vec<FileAppenderConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            loggers: vec![Logger {
                name: "root".to_string(),
                target: String::new(),
                level: Level::Info,
            }],
            console_appender: Some(ConsoleAppenderConfig {
                enable: true,
                write_level: Level::Info,
                logger_names: vec!["root".to_string()],
            }),
            file_appenders: vec![],
        }
    }
}

impl ConfigPrefix for LoggingConfig {
    const PREFIX: &'static str = "logging";
}

impl LoggingConfig {
    pub fn new(config: &Config) -> Result<Self, BootstrapError> {
        let logging_config: LoggingConfig = config.get()?;
        logging_config.validate()?;
        Ok(logging_config)
    }

    pub fn loggers(&self) -> &[Logger] {
        &self.loggers
    }

    pub fn console_appender_config(&self) -> Option<&ConsoleAppenderConfig> {
        self.console_appender.as_ref()
    }

    pub fn file_appender_config(&self) -> &[FileAppenderConfig] {
        &self.file_appenders
    }

    fn validate(&self) -> Result<(), BootstrapError> {
        let mut names = HashSet::new();
        for logger in &self.loggers {
            if !names.insert(logger.name.as_str()) {
                return Err(BootstrapError::InvalidConfigValueError(format!(
                    "logging.loggers[?].name={} is duplicated",
                    logger.name
                )));
            }
        }
        let appenders = self
            .console_appender
            .iter()
            .map(|c| ("console_appender", &c.logger_names, c.write_level))
            .chain(
                self.file_appenders
                    .iter()
                    .map(|f| ("file_appenders[?]", &f.logger_names, f.write_level)),
            );
        for (key, logger_names, write_level) in appenders {
            if write_level.as_tracing_level().is_none() {
                return Err(BootstrapError::InvalidConfigValueError(format!(
                    "logging.{}.write_level={:?}",
                    key, write_level
                )));
            }
            if let Some(unknown) = logger_names.iter().find(|n| !names.contains(n.as_str())) {
                return Err(BootstrapError::InvalidConfigValueError(format!(
                    "logging.{}.logger_names contains unknown logger `{}`",
                    key, unknown
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Logger {
    #[serde(deserialize_with = "crate::serde::non_empty")]
    name: String,
    /// Tracing target prefix, empty for the default directive.
    #[serde(default)]
    target: String,
    #[serde(default)]
    level: Level,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleAppenderConfig {
    enable: bool,
    write_level: Level,
    logger_names: Vec<String>,
}

impl Default for ConsoleAppenderConfig {
    fn default() -> Self {
        Self {
            enable: true,
            write_level: Level::Info,
            logger_names: vec![],
        }
    }
}

impl ConsoleAppenderConfig {
    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn write_level(&self) -> Level {
        self.write_level
    }

    pub fn logger_names(&self) -> &[String] {
        &self.logger_names
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileAppenderConfig {
    enable: bool,
    write_level: Level,
    file_path: PathBuf,
    file_max_count: usize,
    file_max_size: u64,
    logger_names: Vec<String>,
}

impl Default for FileAppenderConfig {
    fn default() -> Self {
        Self {
            enable: true,
            write_level: Level::Info,
            file_path: PathBuf::from("logs/kestrel.log"),
            file_max_count: 7,
            file_max_size: 10 * 1024 * 1024,
            logger_names: vec![],
        }
    }
}

impl FileAppenderConfig {
    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn write_level(&self) -> Level {
        self.write_level
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    pub fn file_max_count(&self) -> usize {
        self.file_max_count
    }

    pub fn file_max_size(&self) -> u64 {
        self.file_max_size
    }

    pub fn logger_names(&self) -> &[String] {
        &self.logger_names
    }
}

/// Keeps the non-blocking writers flushing for as long as it lives.
pub struct AppenderGuard {
    _guards: Vec<WorkerGuard>,
}

impl AppenderGuard {
    pub fn new(guards: Vec<WorkerGuard>) -> Self {
        Self { _guards: guards }
    }
}

/// Installs the global subscriber described by `config`.
pub fn install(config: &LoggingConfig) -> Result<AppenderGuard, BootstrapError> {
    let (layers, guard) = build_layers(config)?;
    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(guard)
}

pub(crate) fn build_layers(
    config: &LoggingConfig,
) -> Result<(Vec<BoxedLayer>, AppenderGuard), BootstrapError> {
    let logger_map: HashMap<&str, &Logger> =
        config.loggers.iter().map(|x| (x.name(), x)).collect();
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut writer_guards = Vec::new();

    for file_config in config.file_appenders.iter().filter(|x| x.enable()) {
        let Some(level) = file_config.write_level().as_tracing_level() else {
            return Err(BootstrapError::InvalidConfigValueError(format!(
                "logging.file_appenders[?].write_level={:?}",
                file_config.write_level()
            )));
        };
        let file_appender = RollingFileAppenderBase::builder()
            .filename(file_config.file_path().to_string_lossy().into_owned())
            .max_filecount(file_config.file_max_count())
            .condition_max_file_size(file_config.file_max_size())
            .condition_daily()
            .build()
            .map_err(|e| BootstrapError::LogFileCreationError(e.into()))?;
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer.with_max_level(level))
            .with_filter(targets(file_config.logger_names(), &logger_map));
        layers.push(layer.boxed());
        writer_guards.push(guard);
    }

    if let Some(console_config) = config.console_appender.as_ref().filter(|x| x.enable()) {
        let Some(level) = console_config.write_level().as_tracing_level() else {
            return Err(BootstrapError::InvalidConfigValueError(format!(
                "logging.console_appender.write_level={:?}",
                console_config.write_level()
            )));
        };
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer.with_max_level(level))
            .with_filter(targets(console_config.logger_names(), &logger_map));
        layers.push(layer.boxed());
        writer_guards.push(guard);
    }

    Ok((layers, AppenderGuard::new(writer_guards)))
}

fn targets(logger_names: &[String], logger_map: &HashMap<&str, &Logger>) -> Targets {
    logger_names
        .iter()
        .map(String::as_str)
        .collect::<HashSet<&str>>()
        .into_iter()
        // names were checked against the declared loggers during validation
        .filter_map(|name| logger_map.get(name))
        .fold(Targets::new(), |acc, item| {
            if item.target().is_empty() {
                acc.with_default(item.level().as_tracing_level_filter())
            } else {
                acc.with_target(item.target(), item.level().as_tracing_level_filter())
            }
        })
}

#[derive(Debug, Default, Copy, Clone, Serialize, PartialEq, Eq)]
pub enum Level {
    /// The "trace" level.
    Trace,
    /// The "debug" level.
    Debug,
    /// The "info" level.
    #[default]
    Info,
    /// The "warn" level.
    Warn,
    /// The "error" level.
    Error,
    /// Off level.
    Off,
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const VARIANTS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| <D::Error as serde::de::Error>::unknown_variant(&s, &VARIANTS))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct ParseLevelError;

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("trace") => Ok(Level::Trace),
            s if s.eq_ignore_ascii_case("debug") => Ok(Level::Debug),
            s if s.eq_ignore_ascii_case("info") => Ok(Level::Info),
            s if s.eq_ignore_ascii_case("warn") => Ok(Level::Warn),
            s if s.eq_ignore_ascii_case("error") => Ok(Level::Error),
            s if s.eq_ignore_ascii_case("off") => Ok(Level::Off),
            _ => Err(ParseLevelError),
        }
    }
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "Trace",
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warn => "Warn",
            Level::Error => "Error",
            Level::Off => "Off",
        }
    }

    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            Level::Trace => Some(tracing::Level::TRACE),
            Level::Debug => Some(tracing::Level::DEBUG),
            Level::Info => Some(tracing::Level::INFO),
            Level::Warn => Some(tracing::Level::WARN),
            Level::Error => Some(tracing::Level::ERROR),
            Level::Off => None,
        }
    }

    pub fn as_tracing_level_filter(&self) -> tracing::level_filters::LevelFilter {
        match self {
            Level::Trace => tracing::level_filters::LevelFilter::TRACE,
            Level::Debug => tracing::level_filters::LevelFilter::DEBUG,
            Level::Info => tracing::level_filters::LevelFilter::INFO,
            Level::Warn => tracing::level_filters::LevelFilter::WARN,
            Level::Error => tracing::level_filters::LevelFilter::ERROR,
            Level::Off => tracing::level_filters::LevelFilter::OFF,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
