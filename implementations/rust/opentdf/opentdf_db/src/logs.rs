use crate::env::{get_env_with_default, FromString};
use crate::{Error, Result};
use std::fmt::{Display, Formatter};
use tracing_core::Level;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log level environment variable
pub const OPENTDF_LOG_LEVEL: &str = "OPENTDF_LOG_LEVEL";
/// Log format environment variable: default, pretty or json
pub const OPENTDF_LOG_FORMAT: &str = "OPENTDF_LOG_FORMAT";

/// Crates which are logged when no crates filter is given
pub const OPENTDF_CRATES: &[&str] = &["opentdf_db", "opentdf_policy"];

/// Format used for log lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Default,
    Pretty,
    Json,
}

impl FromString for LogFormat {
    fn from_string(s: &str) -> Result<Self> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Ok(LogFormat::Default),
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Default => write!(f, "default"),
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Newtype to read a tracing level from the environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelVar(pub Level);

impl FromString for LevelVar {
    fn from_string(s: &str) -> Result<Self> {
        s.parse::<Level>()
            .map(LevelVar)
            .map_err(|e| Error::configuration(format!("invalid log level {s}: {e}")))
    }
}

/// List of the configuration parameters relevant for configuring the logs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfiguration {
    /// Verbosity required for a log record
    level: Level,
    /// Format used for log lines
    format: LogFormat,
    /// Crates for which we keep log messages
    crates: Vec<String>,
}

impl LoggingConfiguration {
    /// Create a new logging configuration
    pub fn new(level: Level, format: LogFormat, crates: &[&str]) -> LoggingConfiguration {
        LoggingConfiguration {
            level,
            format,
            crates: crates.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Create a logging configuration from environment variables
    pub fn from_env() -> Result<LoggingConfiguration> {
        let level = get_env_with_default(OPENTDF_LOG_LEVEL, LevelVar(Level::INFO))?;
        let format = get_env_with_default(OPENTDF_LOG_FORMAT, LogFormat::Default)?;
        Ok(LoggingConfiguration::new(level.0, format, OPENTDF_CRATES))
    }

    /// Return the logging level
    pub fn level(&self) -> Level {
        self.level
    }

    /// Return the log format
    pub fn format(&self) -> LogFormat {
        self.format.clone()
    }

    /// Set the log level
    pub fn set_log_level(self, level: Level) -> LoggingConfiguration {
        LoggingConfiguration { level, ..self }
    }

    /// Create an EnvFilter which keeps only the log messages
    ///
    ///  - for the configured level
    ///  - for the configured crates
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::ERROR.into())
            .parse_lossy(
                self.crates
                    .iter()
                    .map(|c| format!("{c}={}", self.level))
                    .collect::<Vec<_>>()
                    .join(","),
            )
    }
}

/// Install a global tracing subscriber writing to stdout.
/// Returns false if a subscriber was already installed.
pub fn setup_logging(configuration: &LoggingConfiguration) -> bool {
    let subscriber = tracing_subscriber::registry().with(configuration.env_filter());
    let result = match configuration.format() {
        LogFormat::Pretty => subscriber.with(layer().pretty()).try_init(),
        LogFormat::Json => subscriber.with(layer().json()).try_init(),
        LogFormat::Default => subscriber.with(layer()).try_init(),
    };
    match result {
        Ok(()) => {
            tracing::info!(configuration = %configuration.format(), "logging initialized");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter() {
        let configuration = LoggingConfiguration::new(Level::DEBUG, LogFormat::Json, OPENTDF_CRATES);
        let filter = configuration.env_filter().to_string();
        assert!(filter.contains("opentdf_db=debug"), "{filter}");
        assert!(filter.contains("opentdf_policy=debug"), "{filter}");
    }

    #[test]
    fn test_parse_level() -> Result<()> {
        assert_eq!(LevelVar::from_string("warn")?, LevelVar(Level::WARN));
        assert!(LevelVar::from_string("loud").is_err());
        assert_eq!(LogFormat::from_string("json")?, LogFormat::Json);
        Ok(())
    }
}
