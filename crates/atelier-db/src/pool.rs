//! SQLite connection pool management.

use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use atelier_core::{defaults, Result};

/// Default acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connections are closed after ten minutes.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connections are recycled after half an hour.
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Sizing and timeouts for the SQLite pool.
///
/// Every content write holds one connection for the length of its
/// transaction, so `max_connections` bounds concurrent writes too.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Wait for a free connection before failing.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    /// How long a statement waits on a locked database file.
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_lifetime: Some(Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS)),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connections(self, max_connections: u32) -> Self {
        Self { max_connections, ..self }
    }

    pub fn min_connections(self, min_connections: u32) -> Self {
        Self { min_connections, ..self }
    }

    pub fn acquire_timeout(self, acquire_timeout: Duration) -> Self {
        Self { acquire_timeout, ..self }
    }

    /// `None` keeps idle connections open indefinitely.
    pub fn idle_timeout(self, idle_timeout: Option<Duration>) -> Self {
        Self { idle_timeout, ..self }
    }

    pub fn max_lifetime(self, max_lifetime: Option<Duration>) -> Self {
        Self { max_lifetime, ..self }
    }

    pub fn busy_timeout(self, busy_timeout: Duration) -> Self {
        Self { busy_timeout, ..self }
    }

    /// In-memory databases live and die with a single connection.
    fn pinned_for_memory(self) -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            idle_timeout: None,
            max_lifetime: None,
            ..self
        }
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Open a pool with [`PoolConfig::default`].
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Open a pool for `database_url`.
///
/// The database file is created when missing and foreign keys are enforced.
/// File databases run in WAL mode; in-memory urls get a single pinned
/// connection since each connection would otherwise see its own database.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<SqlitePool> {
    let start = Instant::now();
    let in_memory = is_memory_url(database_url);
    let config = if in_memory {
        debug!(
            subsystem = "db",
            component = "pool",
            "In-memory database, pinning pool to one connection"
        );
        config.pinned_for_memory()
    } else {
        config
    };

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        in_memory,
        "Opening SQLite pool"
    );

    let mut connect = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);
    if !in_memory {
        connect = connect.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(connect)
        .await?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "ready",
        connections = pool.size(),
        idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "SQLite pool ready"
    );
    Ok(pool)
}

/// Emit connection counts; warns once every connection is checked out.
pub fn log_pool_metrics(pool: &SqlitePool) {
    let (connections, idle) = (pool.size(), pool.num_idle());
    debug!(subsystem = "db", component = "pool", op = "metrics", connections, idle, "Pool usage");

    if connections > 0 && idle == 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            connections,
            "Every pooled connection is busy; writers will queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = PoolConfig::new()
            .max_connections(8)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(60))
            .busy_timeout(Duration::from_secs(1));

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_memory_urls_detected() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:atelier?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite:///var/lib/atelier/atelier.db"));
    }

    #[test]
    fn test_memory_pool_is_pinned() {
        let config = PoolConfig::new().max_connections(10).pinned_for_memory();
        assert_eq!(config.max_connections, 1);
        assert!(config.idle_timeout.is_none());
        assert!(config.max_lifetime.is_none());
    }

    #[tokio::test]
    async fn test_memory_pool_connects() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
        log_pool_metrics(&pool);
    }
}
