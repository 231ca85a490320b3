//! Logging setup for Belfry.
//!
//! Built on `tracing-subscriber`. Every trigger is dispatched inside a
//! `dispatch` span and every rule or job run inside an `invoke` span;
//! [`SpanMode`] decides which of their events reach the log. Suppressions and
//! completed invocations are logged below `info` by the engine, so they are
//! switched on per target rather than by lowering the global level.
//!
//! ```rust,ignore
//! use belfry_runtime::config::load_config;
//! use belfry_runtime::logging;
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! ```rust,ignore
//! use belfry_runtime::config::SpanMode;
//! use belfry_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .spans(SpanMode::Timings)
//!     .suppressions(true)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{Level, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanMode};

/// Targets whose `debug` events report rate-limited and exclusive
/// suppressions.
pub const SUPPRESSION_TARGETS: &[&str] = &[
    "belfry_framework::dispatcher",
    "belfry_framework::ratelimit",
];

/// Targets reporting completed invocations (`trace`) and job ticks
/// (`debug`).
pub const INVOCATION_TARGETS: &[(&str, Level)] = &[
    ("belfry_framework::executor", Level::TRACE),
    ("belfry_framework::scheduler", Level::DEBUG),
];

const DEFAULT_LOG_FILE: &str = "belfry.log";

impl SpanMode {
    fn to_fmt_span(self) -> FmtSpan {
        match self {
            Self::Off => FmtSpan::NONE,
            Self::Timings => FmtSpan::CLOSE,
            Self::Lifecycle => FmtSpan::NEW | FmtSpan::CLOSE,
            Self::Full => FmtSpan::FULL,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// A builder for the global `tracing` subscriber.
#[derive(Debug)]
pub struct LoggingBuilder {
    level: Level,
    directives: Vec<String>,
    spans: SpanMode,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    thread_ids: bool,
    file_location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            spans: SpanMode::Off,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            thread_ids: false,
            file_location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .level(config.level.to_tracing_level())
            .spans(config.spans)
            .format(config.format)
            .output(config.output)
            .thread_ids(config.thread_ids)
            .file_location(config.file_location)
            .suppressions(config.suppressions)
            .invocations(config.invocations);
        builder.file_path.clone_from(&config.file_path);

        // Explicit filters come last so they win over the switches above.
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder = builder.directive(format!("{target}={level}"));
        }
        builder
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds an `EnvFilter` directive such as `belfry_framework::registry=debug`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn spans(mut self, spans: SpanMode) -> Self {
        self.spans = spans;
        self
    }

    /// Logs every suppressed candidate, whatever the global level.
    pub fn suppressions(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        SUPPRESSION_TARGETS
            .iter()
            .fold(self, |b, target| b.directive(format!("{target}=debug")))
    }

    /// Logs every completed invocation and job tick, whatever the global
    /// level.
    pub fn invocations(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        INVOCATION_TARGETS.iter().fold(self, |b, (target, level)| {
            b.directive(format!("{target}={}", level.as_str().to_lowercase()))
        })
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Log file used when the output is [`LogOutput::File`].
    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Includes source file and line number.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.file_location = enabled;
        self
    }

    /// `RUST_LOG` replaces the configured level; directives apply on top.
    /// Returns the directives that did not parse.
    fn build_filter(&self) -> (EnvFilter, Vec<&str>) {
        let base = self.level.as_str().to_lowercase();
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        let mut rejected = Vec::new();

        for directive in &self.directives {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(_) => rejected.push(directive.as_str()),
            }
        }
        (filter, rejected)
    }

    fn make_writer(&self) -> BoxMakeWriter {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path
                    .file_name()
                    .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
                BoxMakeWriter::new(tracing_appender::rolling::never(dir, name))
            }
            (LogOutput::File, None) => BoxMakeWriter::new(std::io::stdout),
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(self.make_writer())
            .with_span_events(self.spans.to_fmt_span())
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_location)
            .with_line_number(self.file_location);

        match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
        }
    }

    /// Installs the subscriber. Does nothing if one is already installed.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let (filter, rejected) = self.build_filter();
        tracing_subscriber::registry()
            .with(self.fmt_layer())
            .with(filter)
            .try_init()?;

        for directive in rejected {
            warn!(%directive, "Ignoring invalid log directive");
        }
        if self.output == LogOutput::File && self.file_path.is_none() {
            warn!("File output requested but no file path configured, logging to stdout");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_modes() {
        assert_eq!(SpanMode::Off.to_fmt_span(), FmtSpan::NONE);
        assert_eq!(SpanMode::Timings.to_fmt_span(), FmtSpan::CLOSE);
        assert_eq!(
            SpanMode::Lifecycle.to_fmt_span(),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
    }

    #[test]
    fn test_engine_switches_add_directives() {
        let builder = LoggingBuilder::new().suppressions(true).invocations(true);
        assert_eq!(
            builder.directives,
            [
                "belfry_framework::dispatcher=debug",
                "belfry_framework::ratelimit=debug",
                "belfry_framework::executor=trace",
                "belfry_framework::scheduler=debug",
            ]
        );

        let quiet = LoggingBuilder::new().suppressions(false).invocations(false);
        assert!(quiet.directives.is_empty());
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            spans: SpanMode::Timings,
            suppressions: true,
            thread_ids: true,
            file_location: true,
            ..Default::default()
        };
        config
            .filters
            .insert("belfry_framework::dispatcher".into(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Level::WARN);
        assert_eq!(builder.spans, SpanMode::Timings);
        assert!(builder.thread_ids && builder.file_location);
        assert_eq!(
            builder.directives.last().map(String::as_str),
            Some("belfry_framework::dispatcher=trace")
        );
        assert_eq!(builder.directives.len(), 3);
    }
}
