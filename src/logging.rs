//! Structured logging: console plus a daily rolling file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config;

/// Rolling log files kept on disk.
const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "backoffice";

const DEV_FILTER: &str = "info,backoffice_pos_lib=debug";
const PROD_FILTER: &str = "error";

/// `BACKOFFICE_ENV=development` (or `dev`) enables verbose logging.
pub fn is_development() -> bool {
    std::env::var("BACKOFFICE_ENV")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "development" | "dev"))
        .unwrap_or(false)
}

/// Line format of the rolling log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

impl FileFormat {
    /// `BACKOFFICE_LOG_FORMAT=json` switches the file to JSON lines.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("BACKOFFICE_LOG_FORMAT").ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Filter directives when `RUST_LOG` is not set.
pub fn default_filter(dev: bool) -> &'static str {
    if dev {
        DEV_FILTER
    } else {
        PROD_FILTER
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(dev: bool) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(dev)));

    let log_dir = config::log_dir();
    prune_old_logs(&log_dir, MAX_LOG_FILES);

    // Console goes to stderr so report output on stdout stays clean.
    let console_layer = fmt::layer().with_target(dev).with_writer(std::io::stderr);

    // At most one of the two file layers is installed.
    let (text_layer, json_layer, guard) = match fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            match FileFormat::from_env() {
                FileFormat::Text => {
                    let layer = fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true);
                    (Some(layer), None, Some(guard))
                }
                FileFormat::Json => {
                    let layer = fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(writer)
                        .with_target(true);
                    (None, Some(layer), Some(guard))
                }
            }
        }
        Err(e) => {
            eprintln!("warning: cannot create log dir {}: {e}", log_dir.display());
            (None, None, None)
        }
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init();

    guard
}

/// Delete all but the `keep` most recent log files in `log_dir`.
pub fn prune_old_logs(log_dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
