use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Whether to write logs to file in addition to stdout
    pub log_to_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skylift")
            .join("logs");

        Self {
            log_dir,
            file_prefix: "skylift".to_string(),
            max_files: 5,
            log_to_file: true,
        }
    }
}

/// Set up tracing for the engine: a compact colored stdout layer, and
/// (unless disabled) a daily-rotated JSON log file.
///
/// Engine events are tagged with a `target` per component, so `RUST_LOG`
/// can dial individual pieces up or down: `uploader` covers session
/// lifecycle, `uploader::scheduler` chunk dispatch/retries/tuning,
/// `uploader::providers` adapter construction, and `uploader::s3` /
/// `uploader::drive` / `uploader::gcs` / `uploader::resumable` the
/// data-plane transfers. `RUST_LOG=uploader::scheduler=trace` narrows to
/// the scheduler; stdout defaults to `info`, the file to `debug`.
///
/// Returns a [`LogGuard`] the caller must hold until exit so buffered file
/// output is not lost.
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    if !config.log_to_file {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_filter(env_filter),
            )
            .init();
        return Ok(LogGuard {
            _worker_guard: None,
        });
    }

    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.log_dir)
        .context("Failed to create file appender")?;

    // Writes are handed to a background thread; the guard flushes them on drop
    let (non_blocking_file, worker_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with({
            // JSON in the file keeps the entries machine-filterable
            let file_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
            fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_filter(file_filter)
        })
        .with({
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true)
                .with_filter(env_filter)
        })
        .init();

    tracing::info!(
        target: "main",
        log_dir = %config.log_dir.display(),
        max_files = config.max_files,
        "Logging system initialized"
    );

    Ok(LogGuard {
        _worker_guard: Some(worker_guard),
    })
}

/// Keeps the file writer's background thread alive. Dropping it flushes any
/// buffered log lines, so it belongs at the top of `main` for the whole run.
pub struct LogGuard {
    _worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.file_prefix, "skylift");
        assert_eq!(config.max_files, 5);
        assert!(config.log_to_file);
    }
}
