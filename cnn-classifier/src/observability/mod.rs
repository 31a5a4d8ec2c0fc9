//! Logging setup.
//!
//! Log lines go to stdout and, unless disabled, are appended without ANSI
//! colors to `logs/running_logs.log`. `RUST_LOG` overrides the default
//! `info` directive.

use crate::errors::{PipelineError, Result};
use crate::utils::create_directories;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Default location of the log file.
pub const DEFAULT_LOG_FILE: &str = "logs/running_logs.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How logging is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset or ignored.
    pub default_directive: String,
    /// File the log is appended to; `None` logs to stdout only.
    pub log_file: Option<PathBuf>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    /// Read `RUST_LOG` before falling back to `default_directive`.
    pub use_env: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            json: false,
            use_env: true,
        }
    }
}

impl LoggingConfig {
    /// Sets the log file.
    #[must_use]
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Ignores `RUST_LOG`.
    #[must_use]
    pub const fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    fn filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(&self.default_directive);
        if self.use_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
        } else {
            fallback()
        }
    }
}

/// Keeps the log file open; flushes it when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard flushes and releases the log file"]
pub struct LoggingGuard {
    file: Option<Arc<File>>,
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = (&**file).flush();
        }
    }
}

fn build_layers(config: &LoggingConfig) -> Result<(Vec<BoxedLayer>, Option<Arc<File>>)> {
    let mut layers: Vec<BoxedLayer> = vec![config.filter().boxed()];

    if config.json {
        layers.push(fmt::layer().json().boxed());
    } else {
        layers.push(fmt::layer().boxed());
    }

    let file = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                create_directories(&[parent])?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| PipelineError::io(path, e))?;
            let file = Arc::new(file);
            let layer = fmt::layer().with_ansi(false).with_writer(Arc::clone(&file));
            if config.json {
                layers.push(layer.json().boxed());
            } else {
                layers.push(layer.boxed());
            }
            Some(file)
        }
        None => None,
    };

    Ok((layers, file))
}

/// Installs the global subscriber.
///
/// If a subscriber is already installed the existing one is kept and a
/// warning is logged through it.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let (layers, file) = build_layers(config)?;
    if let Err(e) = tracing_subscriber::registry().with(layers).try_init() {
        warn!(error = %e, "Global subscriber already installed, keeping it");
    }
    Ok(LoggingGuard { file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tracing::info;

    #[test]
    fn test_file_layer_writes_plain_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/running_logs.log");
        let config = LoggingConfig::default()
            .with_log_file(Some(path.clone()))
            .without_env();

        let (layers, file) = build_layers(&config).unwrap();
        let guard = LoggingGuard { file };
        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            info!(stage = "Data Ingestion Stage", "hello from the log test");
            tracing::debug!("filtered out at info");
        });
        drop(guard);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("hello from the log test"));
        assert!(!text.contains("filtered out"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_json_file_layer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.log");
        let config = LoggingConfig::default()
            .with_log_file(Some(path.clone()))
            .with_json(true)
            .with_default_directive("debug")
            .without_env();

        let (layers, _file) = build_layers(&config).unwrap();
        tracing::subscriber::with_default(tracing_subscriber::registry().with(layers), || {
            tracing::debug!(epoch = 1, "json line");
        });

        let text = fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(line["fields"]["message"], "json line");
    }

    #[test]
    fn test_stdout_only() {
        let config = LoggingConfig::default().with_log_file(None);
        let (layers, file) = build_layers(&config).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(file.is_none());
    }
}
