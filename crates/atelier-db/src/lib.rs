//! # atelier-db
//!
//! SQLite + filesystem storage layer for the atelier content store.
//!
//! This crate provides:
//! - Connection pool management and embedded migrations
//! - A flat-directory blob store for image payloads
//! - The shared attachment index with dense re-sequencing
//! - One generic content repository, instantiated for portfolios, essays
//!   and the singleton profile, that keeps blobs and rows consistent
//! - The user store used by the auth layer
//!
//! ## Example
//!
//! ```rust,ignore
//! use atelier_db::{Database, PortfolioRepository, CreatePortfolioRequest, ImagePayload, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect(&StorageConfig::from_env()?).await?;
//!
//!     let id = db.portfolios.create(CreatePortfolioRequest {
//!         title: "Harbour at dusk".to_string(),
//!         images: vec![ImagePayload::new("dusk.jpg", std::fs::read("dusk.jpg")?)],
//!     }).await?;
//!
//!     println!("Created portfolio: {}", id);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

pub mod attachments;
pub mod blob_store;
pub mod content;
pub mod essay;
mod ledger;
pub mod pool;
pub mod portfolio;
pub mod profile;
pub mod transaction;
pub mod users;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can share them
pub mod test_fixtures;

// Re-export core types
pub use atelier_core::*;

pub use attachments::SqliteAttachmentIndex;
pub use blob_store::{generate_blob_name, FilesystemBlobStore};
pub use content::{
    ContentKind, ContentPatch, ContentRepository, ContentSnapshot, Fields, NewContent, Target,
};
pub use essay::{EssayKind, SqliteEssayRepository};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use portfolio::{PortfolioKind, SqlitePortfolioRepository};
pub use profile::{ProfileKind, SqliteProfileRepository};
pub use transaction::{TransactionGate, TxOutcome};
pub use users::{password_digest, SqliteUserRepository};

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
    Ok(())
}

/// Combined storage context with all repositories.
///
/// Built once at startup and handed to whoever serves requests.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: SqlitePool,
    /// Blob store shared by every content repository.
    pub blobs: Arc<dyn BlobStore>,
    /// Attachment index, for read-only lookups.
    pub attachments: SqliteAttachmentIndex,
    pub portfolios: SqlitePortfolioRepository,
    pub essays: SqliteEssayRepository,
    /// Singleton profile and its history.
    pub profile: SqliteProfileRepository,
    pub users: SqliteUserRepository,
}

impl Database {
    /// Create a Database from an existing pool and blob store.
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            attachments: SqliteAttachmentIndex::new(pool.clone()),
            portfolios: SqlitePortfolioRepository::new(pool.clone(), Arc::clone(&blobs)),
            essays: SqliteEssayRepository::new(pool.clone(), Arc::clone(&blobs)),
            profile: SqliteProfileRepository::new(pool.clone(), Arc::clone(&blobs)),
            users: SqliteUserRepository::new(pool.clone()),
            blobs,
            pool,
        }
    }

    /// Connect, migrate, and prepare the blob directory.
    ///
    /// Fails with [`Error::Config`] when the blob directory cannot be
    /// written.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = create_pool_with_config(
            &config.database_url,
            PoolConfig::new().max_connections(config.max_connections),
        )
        .await?;
        run_migrations(&pool).await?;

        let store = FilesystemBlobStore::new(&config.image_dir, &config.image_uri_prefix)?;
        store.validate().await.map_err(|e| {
            Error::Config(format!(
                "blob directory {} is not usable: {e}",
                store.directory().display()
            ))
        })?;

        info!(
            subsystem = "db",
            component = "database",
            op = "connect",
            image_dir = %store.directory().display(),
            image_uri_prefix = %store.uri_prefix(),
            "Storage ready"
        );
        Ok(Self::new(pool, Arc::new(store)))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
