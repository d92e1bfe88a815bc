//! Logging configuration

use std::path::PathBuf;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::OrchestratorError;

/// Log level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl serde::Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_filter_string())
    }
}

impl<'de> serde::Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level
    pub log_level: LogLevel,

    /// Write logs to stdout
    pub stdout: bool,

    /// Log directory for per-run file output; no file layer when absent
    pub log_dir: Option<PathBuf>,

    /// Enable JSON format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Initialize logging.
///
/// Returns a guard that must be held for the lifetime of the process when a
/// file layer is active, otherwise buffered log lines are lost on exit.
pub fn init_logging(
    options: LogOptions,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, OrchestratorError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.to_filter_string()));

    let subscriber = tracing_subscriber::registry().with(filter);

    // The file layer is rebuilt per branch: each subscriber stack is a
    // distinct type, so one layer value cannot be shared across both.
    let (file_writer, guard) = match &options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "pazdeploy.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    if options.json_format {
        subscriber
            .with(options.stdout.then(|| fmt::layer().json()))
            .with(file_writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
            .try_init()
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
    } else {
        subscriber
            .with(options.stdout.then(fmt::layer))
            .with(file_writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
            .try_init()
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_file_layer() {
        let dir = std::env::temp_dir().join(format!(
            "pazdeploy-logtest-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let guard = init_logging(LogOptions {
            stdout: false,
            log_dir: Some(dir.clone()),
            ..Default::default()
        })
        .unwrap();
        assert!(guard.is_some());

        tracing::info!("file layer initialized");
        drop(guard);
        assert!(dir.join("pazdeploy.log").exists());
    }
}
