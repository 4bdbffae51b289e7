//! Logging setup.
//!
//! Console and daily-rolling file output with local-time timestamps, and a
//! background task pruning old log files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;
use crate::{Error, Result};

/// Default log filter directive, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "farm_notify=info,sqlx=warn";

/// Rolling log file prefix; rotated files get a `.YYYY-MM-DD` suffix.
const LOG_FILE_PREFIX: &str = "farm-notify.log";

const LOG_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// The installed subscriber's file output.
pub struct LoggingConfig {
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Prune old log files once a day until `cancel` fires.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let interval = Duration::from_secs(24 * 60 * 60);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Log retention task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS, Utc::now()).await {
                            warn!(error = %e, "Failed to clean up old logs");
                        }
                    }
                }
            }
        });
    }
}

/// Delete rotated log files dated more than `retention_days` before `now`.
///
/// Returns the number of files removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = (now - chrono::Duration::days(retention_days)).date_naive();
    let mut entries = tokio::fs::read_dir(log_dir)
        .await
        .map_err(|e| fs::io_error("listing", log_dir, e))?;
    let mut deleted = 0;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("listing", log_dir, e))?
    {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|suffix| suffix.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date >= cutoff || !path.is_file() {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                deleted += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process, or buffered
/// file output is lost.
pub fn init_logging(log_dir: &str) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_dir = PathBuf::from(log_dir);
    fs::ensure_dir_all_sync_with_op("creating log directory", &log_dir)?;

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok((Arc::new(LoggingConfig { log_dir }), guard))
}
