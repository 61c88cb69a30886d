//! Logging setup for applications embedding rockbind.
//!
//! The library only emits `tracing` events; nothing is printed until the
//! application installs a subscriber. [`LogConfig`] installs one with the
//! usual choices. Callback failures (panics, unknown tokens) are logged at
//! `error` under the `rockbind::shim` target, registry traffic at `debug`
//! under `rockbind::registry`.

use rockbind_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "rockbind.log";

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    /// Daily-rotated file
    File(PathBuf),
    /// Stdout and a daily-rotated file
    Both(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Pretty,
    Compact,
}

/// Subscriber configuration. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Also log every registry insert and removal and every native handle
    /// release.
    pub trace_lifecycle: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Pretty,
            trace_lifecycle: false,
        }
    }
}

impl LogConfig {
    pub fn info() -> Self {
        Self::default()
    }

    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_lifecycle_tracing(mut self, on: bool) -> Self {
        self.trace_lifecycle = on;
        self
    }

    /// The filter directives this configuration installs when `RUST_LOG`
    /// is unset.
    pub fn directives(&self) -> String {
        if self.trace_lifecycle {
            format!(
                "{},rockbind::registry=debug,rockbind::handle=debug",
                self.level
            )
        } else {
            self.level.clone()
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .map_err(|e| Error::InvalidArgument(format!("log level {:?}: {}", self.level, e)))
    }

    /// Install the global subscriber.
    ///
    /// Keep the returned guard alive while logging to a file; dropping it
    /// flushes and stops the writer thread. Fails if the level does not
    /// parse or a global subscriber is already installed.
    ///
    /// ```rust,no_run
    /// use rockbind::logging::LogConfig;
    ///
    /// let _guard = LogConfig::info().with_file("logs/rockbind.log").init()?;
    /// # Ok::<(), rockbind::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let env_filter = self.filter()?;
        let registry = tracing_subscriber::registry().with(env_filter);

        let (result, guard) = match &self.output {
            LogOutput::Stdout => {
                let result = match self.format {
                    LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
                    LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                };
                (result, None)
            }
            LogOutput::File(path) => {
                let (writer, guard) = tracing_appender::non_blocking(appender(path));
                let result = match self.format {
                    LogFormat::Pretty => registry
                        .with(fmt::layer().with_writer(writer).with_ansi(false).pretty())
                        .try_init(),
                    LogFormat::Compact => registry
                        .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                        .try_init(),
                };
                (result, Some(guard))
            }
            LogOutput::Both(path) => {
                let (writer, guard) = tracing_appender::non_blocking(appender(path));
                let result = registry
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init();
                (result, Some(guard))
            }
        };
        result.map_err(|e| Error::InvalidArgument(format!("logging already initialised: {}", e)))?;
        Ok(guard)
    }
}

fn appender(path: &Path) -> tracing_appender::rolling::RollingFileAppender {
    tracing_appender::rolling::daily(
        path.parent().unwrap_or_else(|| Path::new(".")),
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.directives(), "info");
        assert!(matches!(config.output, LogOutput::Stdout));
    }

    #[test]
    fn test_lifecycle_directives() {
        let config = LogConfig::warn()
            .with_both("/tmp/rb.log")
            .with_format(LogFormat::Compact)
            .with_lifecycle_tracing(true);
        assert!(config.directives().starts_with("warn,"));
        assert!(config.directives().contains("rockbind::registry=debug"));
        assert!(matches!(config.output, LogOutput::Both(_)));
    }

    #[test]
    fn test_bad_level_is_an_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = LogConfig::default().with_level("rockbind=verbose").init().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
