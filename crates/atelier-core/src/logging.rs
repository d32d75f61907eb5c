//! Structured logging schema and subscriber setup for atelier.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same field names everywhere.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Blob left behind after a purge attempt, requires operator attention |
//! | WARN  | Recoverable issue (rollback failed, probe cleanup failed) |
//! | INFO  | Pool lifecycle, completed writes |
//! | DEBUG | Decision points: blobs staged, attachments resequenced |
//! | TRACE | Per-blob iteration |

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::defaults;
use crate::error::{Error, Result};

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "blob"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "attachments", "content", "gate", "filesystem"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create", "update", "remove", "resequence", "put"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owner kind of the content entity ("portfolio", "essay", "profile").
pub const OWNER_KIND: &str = "owner_kind";

/// Integer id of the content entity.
pub const OWNER_ID: &str = "owner_id";

/// Public uri of a blob.
pub const BLOB_URI: &str = "blob_uri";

/// Filesystem path of a blob.
pub const STORE_PATH: &str = "store_path";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of blobs written or purged.
pub const BLOB_COUNT: &str = "blob_count";

/// Number of attachment rows affected.
pub const ROW_COUNT: &str = "row_count";

/// Payload size in bytes.
pub const SIZE_BYTES: &str = "size_bytes";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Terminal state of a write ("committed", "aborted").
pub const OUTCOME: &str = "outcome";

/// Error message on failure.
pub const ERROR_MSG: &str = "error";

// ─── Subscriber setup ──────────────────────────────────────────────────────

/// Output format for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber options, usually read from the environment.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// When set, logs go to a daily-rolling file instead of stdout.
    pub file: Option<String>,
    /// Force ANSI colors on or off; auto-detected when `None`.
    pub ansi: Option<bool>,
}

impl LogConfig {
    /// Read `LOG_FORMAT`, `LOG_FILE` and `LOG_ANSI`.
    pub fn from_env() -> Self {
        let format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let file = std::env::var("LOG_FILE").ok().filter(|f| !f.is_empty());
        let ansi = std::env::var("LOG_ANSI")
            .ok()
            .map(|v| v == "true" || v == "1");
        Self { format, file, ansi }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering. Returns the appender guard when file
/// output is enabled; it must be held for the life of the process.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| defaults::LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = config.file {
        let path = Path::new(path);
        let dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(defaults::LOG_FILE_NAME);
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let installed = match config.format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(config.ansi.unwrap_or(false))
                        .with_writer(non_blocking),
                )
                .try_init(),
        };
        installed.map_err(|e| Error::Config(format!("tracing subscriber: {e}")))?;
        Some(guard)
    } else {
        let installed = match config.format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init(),
            LogFormat::Text => {
                let mut layer = tracing_subscriber::fmt::layer();
                if let Some(ansi) = config.ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).try_init()
            }
        };
        installed.map_err(|e| Error::Config(format!("tracing subscriber: {e}")))?;
        None
    };

    tracing::info!(
        log_format = ?config.format,
        log_file = config.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_distinct() {
        let fields = [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            OWNER_KIND,
            OWNER_ID,
            BLOB_URI,
            STORE_PATH,
            DURATION_MS,
            BLOB_COUNT,
            ROW_COUNT,
            SIZE_BYTES,
            OUTCOME,
            ERROR_MSG,
        ];
        let unique: std::collections::HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
    }

    #[test]
    fn test_default_log_config_is_text_stdout() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.file.is_none());
        assert!(config.ansi.is_none());
    }
}
