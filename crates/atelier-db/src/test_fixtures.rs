//! Test fixtures for storage integration tests.
//!
//! Provides a throwaway store (SQLite file plus blob directory inside a
//! caller-owned directory) and fault-injection helpers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atelier_db::test_fixtures::TestStore;
//! use tempfile::TempDir;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let dir = TempDir::new().unwrap();
//!     let store = TestStore::in_dir(dir.path()).await;
//!     // store.db.portfolios ...
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use atelier_core::{BlobStore, Error, ImagePayload, Result, StoredBlob};

use crate::blob_store::FilesystemBlobStore;
use crate::pool::{create_pool_with_config, PoolConfig};
use crate::{run_migrations, Database};

/// Uri prefix used by fixture blob stores.
pub const TEST_URI_PREFIX: &str = "/images";

/// A migrated database plus the directory its blobs land in.
pub struct TestStore {
    pub db: Database,
    pub blob_dir: PathBuf,
}

impl TestStore {
    /// Build a store whose database and blobs live under `dir`.
    pub async fn in_dir(dir: &Path) -> Self {
        let blob_dir = dir.join("images");
        let blobs = FilesystemBlobStore::new(&blob_dir, TEST_URI_PREFIX)
            .expect("blob store should accept test dir");
        Self::with_blob_store(dir, blob_dir, Arc::new(blobs)).await
    }

    /// Like [`TestStore::in_dir`] but with a caller-supplied blob store,
    /// typically a [`FlakyBlobStore`] writing into `blob_dir`.
    pub async fn with_blob_store(dir: &Path, blob_dir: PathBuf, blobs: Arc<dyn BlobStore>) -> Self {
        let url = format!("sqlite://{}", dir.join("atelier-test.db").display());
        let pool = create_pool_with_config(&url, PoolConfig::new().max_connections(4))
            .await
            .expect("test database should open");
        run_migrations(&pool).await.expect("migrations should apply");
        std::fs::create_dir_all(&blob_dir).expect("blob dir should be creatable");
        Self {
            db: Database::new(pool, blobs),
            blob_dir,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db.pool
    }

    /// Blob file names currently on disk, sorted.
    pub fn blob_files(&self) -> Vec<String> {
        blob_files(&self.blob_dir)
    }

    /// Store path a uri maps to.
    pub fn path_of(&self, uri: &str) -> PathBuf {
        self.db
            .blobs
            .resolve(uri)
            .unwrap_or_else(|| panic!("uri {uri} is not from the test store"))
    }

    /// Make every insert into `table` fail inside its transaction.
    pub async fn fail_inserts_into(&self, table: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_insert_{table} BEFORE INSERT ON {table} \
             BEGIN SELECT RAISE(ABORT, 'forced failure'); END"
        );
        sqlx::query(&sql)
            .execute(self.pool())
            .await
            .expect("trigger should install");
    }

    /// Make every update of `table` fail inside its transaction.
    pub async fn fail_updates_of(&self, table: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_update_{table} BEFORE UPDATE ON {table} \
             BEGIN SELECT RAISE(ABORT, 'forced failure'); END"
        );
        sqlx::query(&sql)
            .execute(self.pool())
            .await
            .expect("trigger should install");
    }

    /// Make every delete from `table` fail inside its transaction.
    pub async fn fail_deletes_from(&self, table: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_delete_{table} BEFORE DELETE ON {table} \
             BEGIN SELECT RAISE(ABORT, 'forced failure'); END"
        );
        sqlx::query(&sql)
            .execute(self.pool())
            .await
            .expect("trigger should install");
    }
}

/// Sorted file names in `dir`, ignoring dot files.
pub fn blob_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// A small payload whose bytes name the file, handy for assertions.
pub fn image(filename: &str) -> ImagePayload {
    ImagePayload::new(filename, format!("bytes of {filename}").into_bytes())
}

/// Blob store wrapper whose `put` fails once a write budget is spent.
pub struct FlakyBlobStore {
    inner: Arc<dyn BlobStore>,
    remaining: AtomicUsize,
}

impl FlakyBlobStore {
    /// Allow `successes` writes, then fail every later one.
    pub fn failing_after(inner: Arc<dyn BlobStore>, successes: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(successes),
        }
    }

    /// Reset the write budget.
    pub fn allow(&self, successes: usize) {
        self.remaining.store(successes, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, filename_hint: &str, bytes: &[u8]) -> Result<StoredBlob> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected write failure for {filename_hint}"),
            )));
        }
        self.inner.put(filename_hint, bytes).await
    }

    async fn delete(&self, store_path: &Path) -> Result<bool> {
        self.inner.delete(store_path).await
    }

    async fn exists(&self, store_path: &Path) -> Result<bool> {
        self.inner.exists(store_path).await
    }

    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        self.inner.resolve(uri)
    }
}
