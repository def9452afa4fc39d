//! Logging setup

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

// Dependencies that are noisy at debug level
const QUIET_TARGETS: &str = "sqlx=warn,hyper=warn,reqwest=warn";

/// Install the global subscriber.
///
/// Console output is filtered by `RUST_LOG` when set, otherwise by the
/// configured level (`debug` when `verbose`). When a log file is configured
/// it receives everything at debug and above, rotated daily; keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let console = if config.format.eq_ignore_ascii_case("json") {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (dir, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)?;

            let appender = tracing_appender::rolling::daily(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console.with_filter(console_filter(&config.level, verbose)))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("failed to install log subscriber: {e}")))?;

    Ok(guard)
}

fn console_filter(level: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { level };
        EnvFilter::new(format!("{level},{QUIET_TARGETS}"))
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, OsString)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::config(format!("log file path '{}' has no file name", path.display())))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((dir, file_name.to_os_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("logs/sonic.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(name, OsString::from("sonic.log"));

        let (dir, _) = split_log_path(Path::new("sonic.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }
}
