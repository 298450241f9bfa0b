//! # Logging
//!
//! Structured logging through `tracing`. JSON lines for production, pretty
//! output for development, optionally buffered on a background writer.
//!
//! ## Environment
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `CONNECT_API_LOG_LEVEL` | `info` | base level when `RUST_LOG` is unset |
//! | `CONNECT_API_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `CONNECT_API_LOG_TARGET_FILTER` | unset | extra comma-separated directives |
//! | `CONNECT_API_LOG_ASYNC` | `false` | buffer output on a writer thread |
//! | `CONNECT_API_LOG_INCLUDE_LOCATION` | `false` | file and line on each event |

use anyhow::{Context, Result};
use std::env;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than `pretty` is JSON.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Comma-separated directives added on top of the level
    pub target_filter: Option<String>,
    pub async_logging: bool,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            target_filter: None,
            async_logging: false,
            include_location: false,
        }
    }
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl LogConfig {
    /// Read the `CONNECT_API_LOG_*` variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// As [`LogConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            log_level: lookup("CONNECT_API_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: lookup("CONNECT_API_LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.format),
            target_filter: lookup("CONNECT_API_LOG_TARGET_FILTER").filter(|f| !f.trim().is_empty()),
            async_logging: flag(lookup("CONNECT_API_LOG_ASYNC")),
            include_location: flag(lookup("CONNECT_API_LOG_INCLUDE_LOCATION")),
        }
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// `RUST_LOG` if set, else the configured level, plus the target filter.
    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));
        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }

    fn fmt_layer<W>(&self, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        match self.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_writer(writer)
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_writer(writer)
                .boxed(),
        }
    }
}

/// Keeps the background writer alive; buffered lines are flushed on drop.
#[must_use = "dropping the guard stops buffered logging"]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<LoggingGuard> {
    let (fmt_layer, worker) = if config.async_logging {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        (config.fmt_layer(writer), Some(guard))
    } else {
        (config.fmt_layer(std::io::stdout), None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(config.env_filter())
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(LoggingGuard { _worker: worker })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CONNECT_API_LOG_LEVEL", "debug"),
            ("CONNECT_API_LOG_FORMAT", "pretty"),
            ("CONNECT_API_LOG_TARGET_FILTER", "connect_api::server=trace"),
            ("CONNECT_API_LOG_ASYNC", "true"),
        ]
        .into_iter()
        .collect();
        let config = LogConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.level(), Level::DEBUG);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.target_filter.as_deref(), Some("connect_api::server=trace"));
        assert!(config.async_logging);
        assert!(!config.include_location);
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = LogConfig::from_lookup(|_| None);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level(), Level::INFO);
        assert!(config.target_filter.is_none());
    }
}
