//! Logging configuration and initialization
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`] to
//! install a subscriber: compact console output, JSON for log aggregation,
//! and optional file output through a non-blocking writer.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, Layer, Registry};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MPEG_FRAMES_LOG";
/// Environment variable selecting the output format (`json` or anything else)
pub const LOG_FORMAT_ENV: &str = "MPEG_FRAMES_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable console output (default: true)
    pub console_enabled: bool,
    /// Enable file logging (default: false)
    pub file_enabled: bool,
    /// Path for the log file (default: `mpeg-frames.log` in the working directory)
    pub file_path: Option<PathBuf>,
    /// Use JSON format for console logs (default: false)
    pub json_format: bool,
    /// Default log level filter (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Config with a different default level, e.g. "debug" for `--verbose`
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            default_level: level.into(),
            ..Self::default()
        }
    }
}

/// Whether the format variable asks for JSON, falling back to the config
fn json_requested(format_var: Option<&str>, config: &LogConfig) -> bool {
    format_var
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(config.json_format)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter from `MPEG_FRAMES_LOG`, then `RUST_LOG`, then the configured level
fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

/// Console layer on stderr; frames may be written to stdout
fn console_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .boxed()
    }
}

/// Plain-text file layer behind a non-blocking writer
fn file_layer(path: &Path) -> std::io::Result<(BoxedLayer, WorkerGuard)> {
    let file = std::fs::File::create(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber
///
/// Keep the returned guard alive until exit so buffered file output is flushed.
/// Fails if a global subscriber is already installed.
///
/// `MPEG_FRAMES_LOG` takes a filter such as `info,mpeg_frames::pump=trace`;
/// `MPEG_FRAMES_LOG_FORMAT=json` switches the console to JSON lines.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let use_json = json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref(), config);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;
    if config.file_enabled {
        let path = config
            .file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("mpeg-frames.log"));
        let (layer, file_guard) = file_layer(&path)?;
        layers.push(layer);
        guard = Some(file_guard);
    }
    if config.console_enabled {
        layers.push(console_layer(use_json));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(config))
        .try_init()?;

    tracing::info!(
        target: "mpeg_frames",
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}

// Re-export WorkerGuard so callers can store it
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert!(!config.json_format);
        assert_eq!(config.default_level, "info");
        assert_eq!(LogConfig::with_level("debug").default_level, "debug");
    }

    #[test]
    fn test_json_requested() {
        let config = LogConfig::default();
        assert!(json_requested(Some("JSON"), &config));
        assert!(!json_requested(Some("pretty"), &config));
        assert!(!json_requested(None, &config));

        let json_config = LogConfig {
            json_format: true,
            ..LogConfig::default()
        };
        assert!(json_requested(None, &json_config));
    }
}
