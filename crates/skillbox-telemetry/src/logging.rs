//! Logging configuration and setup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::Filter {
                directive: other.to_string(),
                message: "expected pretty, compact or json".to_string(),
            }),
        }
    }
}

/// Where events are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum LogTarget {
    /// Standard error.
    #[default]
    Stderr,
    /// Standard output.
    Stdout,
    /// Daily-rotated files `<directory>/<prefix>.<date>`.
    File {
        /// Log directory, created if missing.
        directory: PathBuf,
        /// File name prefix.
        prefix: String,
    },
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base level (`info`, `debug`, ...), ignored when `RUST_LOG` is set.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Output target.
    #[serde(default)]
    pub target: LogTarget,
    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Use ANSI colors (always off for files).
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Extra directives such as `skillbox_plugins::sandbox=trace`.
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            timestamps: true,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Config at `level`, otherwise default.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Set the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write daily-rotated files to `directory`.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        self.target = LogTarget::File {
            directory: directory.into(),
            prefix: prefix.into(),
        };
        self.ansi = false;
        self
    }

    /// Add a filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Drop timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Drop ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    fn build_filter(&self, rust_log: Option<&str>) -> TelemetryResult<EnvFilter> {
        let base = rust_log
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.level);
        let mut filter = EnvFilter::try_new(base).map_err(|e| TelemetryError::Filter {
            directive: base.to_string(),
            message: e.to_string(),
        })?;

        for directive in &self.directives {
            let parsed = directive.parse().map_err(
                |e: tracing_subscriber::filter::ParseError| TelemetryError::Filter {
                    directive: directive.clone(),
                    message: e.to_string(),
                },
            )?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }

    fn writer(&self) -> TelemetryResult<BoxMakeWriter> {
        Ok(match &self.target {
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogTarget::File { directory, prefix } => {
                std::fs::create_dir_all(directory)?;
                BoxMakeWriter::new(RollingFileAppender::new(Rotation::DAILY, directory, prefix))
            },
        })
    }

    fn layer(&self, writer: BoxMakeWriter) -> BoxedLayer {
        let ansi = self.ansi && !matches!(self.target, LogTarget::File { .. });
        let base = fmt::layer().with_writer(writer).with_ansi(ansi);
        match (self.format, self.timestamps) {
            (LogFormat::Pretty, true) => base.pretty().boxed(),
            (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => base.compact().boxed(),
            (LogFormat::Compact, false) => base.compact().without_time().boxed(),
            (LogFormat::Json, true) => base.json().boxed(),
            (LogFormat::Json, false) => base.json().without_time().boxed(),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if a level or directive is invalid, the log directory
/// cannot be created, or a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = config.build_filter(rust_log.as_deref())?;
    let layer = config.layer(config.writer()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

/// Install the default subscriber: `info`, pretty, stderr.
///
/// # Errors
///
/// See [`setup_logging`].
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.timestamps);
    }

    #[test]
    fn file_logging_disables_ansi() {
        let config = LogConfig::new("debug").with_file_logging("/var/log/skillbox", "skillbox");
        assert!(!config.ansi);
        assert!(matches!(config.target, LogTarget::File { ref prefix, .. } if prefix == "skillbox"));
    }

    #[test]
    fn rust_log_overrides_level() {
        let config = LogConfig::new("[invalid=syntax");
        assert!(config.build_filter(None).is_err());
        assert!(config.build_filter(Some("warn")).is_ok());
        assert!(config.build_filter(Some("  ")).is_err());
    }

    #[test]
    fn bad_directive_is_named() {
        let err = LogConfig::new("info")
            .with_directive("[invalid=syntax")
            .build_filter(None)
            .unwrap_err();
        assert!(err.to_string().contains("[invalid=syntax"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn serde_shape() {
        let config = LogConfig::new("warn")
            .with_format(LogFormat::Json)
            .with_file_logging("logs", "skillbox");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["format"], "json");
        assert_eq!(json["target"]["kind"], "file");

        let parsed: LogConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn file_writer_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        let config = LogConfig::new("info").with_file_logging(&dir, "skillbox");
        assert!(config.writer().is_ok());
        assert!(dir.is_dir());
    }
}
