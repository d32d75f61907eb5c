//! Flat-directory blob store for image payloads.
//!
//! Every blob gets a fresh name: the SHA-256 hex digest of the sanitized
//! filename stem, the write timestamp and a per-store sequence number,
//! followed by the original extension. Public uris are
//! `{uri_prefix}/{name}` and store paths are `{directory}/{name}`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use atelier_db::FilesystemBlobStore;
//!
//! let store = FilesystemBlobStore::new("./assets/images", "/images")?;
//! let blob = store.put("cat.jpg", &bytes).await?;
//! assert!(blob.uri.starts_with("/images/"));
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use atelier_core::{split_filename_hint, BlobStore, Error, Result, StoredBlob};

/// Attempts at finding an unused name before giving up.
const NAME_ATTEMPTS: usize = 4;

/// Blob store writing into a single flat directory.
pub struct FilesystemBlobStore {
    directory: PathBuf,
    uri_prefix: String,
    sequence: AtomicU64,
}

impl FilesystemBlobStore {
    /// Create a store rooted at `directory`, serving blobs under `uri_prefix`.
    ///
    /// Relative directories are resolved against the current working
    /// directory so store paths are always absolute.
    pub fn new(directory: impl Into<PathBuf>, uri_prefix: impl Into<String>) -> Result<Self> {
        let directory = directory.into();
        let directory = if directory.is_absolute() {
            directory
        } else {
            std::env::current_dir()?.join(directory)
        };
        let uri_prefix = uri_prefix.into().trim_end_matches('/').to_string();
        Ok(Self {
            directory,
            uri_prefix,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn uri_prefix(&self) -> &str {
        &self.uri_prefix
    }

    /// Create the blob directory if it does not exist yet.
    pub async fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.directory).await.map_err(|e| {
            warn!(directory = %self.directory.display(), error = %e, "blob_store: create_dir_all failed");
            Error::Io(e)
        })
    }

    /// Validate that the directory can be written, read and cleaned up.
    ///
    /// Run once at startup to surface permission or mount problems before
    /// the first upload does.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let probe = self.directory.join(format!(".health-check-{}", Uuid::new_v4()));

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", self.directory, e))?;

        let data = b"blob-store-health-check";
        fs::write(&probe, data)
            .await
            .map_err(|e| format!("write({:?}): {}", probe, e))?;

        let read_back = fs::read(&probe)
            .await
            .map_err(|e| format!("read({:?}): {}", probe, e))?;
        if read_back != data {
            let _ = fs::remove_file(&probe).await;
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&probe)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", probe, e))?;
        Ok(())
    }

    fn next_name(&self, stem: &str, extension: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        generate_blob_name(stem, extension, &timestamp, sequence)
    }

    fn uri_for(&self, name: &str) -> String {
        format!("{}/{}", self.uri_prefix, name)
    }

    /// Write to a sibling temp file, then rename into place.
    async fn write_atomically(&self, target: &Path, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self
            .directory
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);

            // rw-r--r--, no execute
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644)).await?;
            }

            fs::rename(&temp_path, target).await
        }
        .await;

        if let Err(e) = &written {
            warn!(temp_path = %temp_path.display(), error = %e, "blob_store: write failed, discarding temp file");
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(temp_path = %temp_path.display(), error = %cleanup, "blob_store: temp file cleanup failed");
                }
            }
        }
        written
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, filename_hint: &str, bytes: &[u8]) -> Result<StoredBlob> {
        let (stem, extension) = split_filename_hint(filename_hint);
        self.ensure_directory().await?;

        let mut target = None;
        for _ in 0..NAME_ATTEMPTS {
            let name = self.next_name(&stem, &extension);
            let path = self.directory.join(&name);
            if !fs::try_exists(&path).await? {
                target = Some((name, path));
                break;
            }
            trace!(name = %name, "blob_store: generated name already taken");
        }
        let (name, store_path) = target.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free blob name for {filename_hint:?}"),
            ))
        })?;

        self.write_atomically(&store_path, bytes).await?;

        let uri = self.uri_for(&name);
        debug!(
            subsystem = "blob",
            component = "filesystem",
            op = "put",
            blob_uri = %uri,
            size_bytes = bytes.len(),
            "Blob written"
        );
        Ok(StoredBlob { uri, store_path })
    }

    async fn delete(&self, store_path: &Path) -> Result<bool> {
        match fs::remove_file(store_path).await {
            Ok(()) => {
                debug!(subsystem = "blob", component = "filesystem", op = "delete", store_path = %store_path.display(), "Blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(store_path = %store_path.display(), "blob_store: already absent");
                Ok(false)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, store_path: &Path) -> Result<bool> {
        Ok(fs::try_exists(store_path).await?)
    }

    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let name = uri.strip_prefix(&self.uri_prefix)?.strip_prefix('/')?;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.directory.join(name))
    }
}

/// Blob name for a write: `sha256_hex(stem + timestamp + sequence) + extension`.
pub fn generate_blob_name(stem: &str, extension: &str, timestamp: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stem.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(sequence.to_be_bytes());
    format!("{}{}", hex::encode(hasher.finalize()), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FilesystemBlobStore {
        FilesystemBlobStore::new(dir.path(), "/images").unwrap()
    }

    #[test]
    fn test_generated_name_shape() {
        let name = generate_blob_name("cat", ".jpg", "2026-10-01T00:00:00.000000001Z", 0);
        assert_eq!(name.len(), 64 + 4);
        assert!(name.ends_with(".jpg"));
        assert!(name[..64].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_name_varies_with_sequence() {
        let ts = "2026-10-01T00:00:00.000000001Z";
        assert_ne!(
            generate_blob_name("cat", ".jpg", ts, 0),
            generate_blob_name("cat", ".jpg", ts, 1)
        );
    }

    #[test]
    fn test_relative_directory_made_absolute() {
        let store = FilesystemBlobStore::new("assets/images", "/images/").unwrap();
        assert!(store.directory().is_absolute());
        assert_eq!(store.uri_prefix(), "/images");
    }

    #[test]
    fn test_resolve_only_accepts_own_uris() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(
            store.resolve("/images/abc.jpg"),
            Some(dir.path().join("abc.jpg"))
        );
        assert_eq!(store.resolve("/media/abc.jpg"), None);
        assert_eq!(store.resolve("/images/"), None);
        assert_eq!(store.resolve("/images/../etc/passwd"), None);
        assert_eq!(store.resolve("/imagesabc.jpg"), None);
    }

    #[tokio::test]
    async fn test_put_same_filename_twice_gives_distinct_blobs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let first = store.put("photo.png", b"one").await.unwrap();
        let second = store.put("photo.png", b"two").await.unwrap();

        assert_ne!(first.uri, second.uri);
        assert_eq!(std::fs::read(&first.store_path).unwrap(), b"one");
        assert_eq!(std::fs::read(&second.store_path).unwrap(), b"two");
        assert_eq!(store.resolve(&first.uri), Some(first.store_path.clone()));
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("a.jpg", b"bytes").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "only the blob should remain: {names:?}");
        assert!(!names[0].ends_with(".tmp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_put_sets_read_only_for_others() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let blob = store(&dir).put("a.jpg", b"bytes").await.unwrap();
        let mode = std::fs::metadata(&blob.store_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_put_into_file_path_fails_with_io() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = FilesystemBlobStore::new(&blocker, "/images").unwrap();

        let err = store.put("a.jpg", b"bytes").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let blob = store.put("a.jpg", b"bytes").await.unwrap();

        assert!(store.delete(&blob.store_path).await.unwrap());
        assert!(!store.exists(&blob.store_path).await.unwrap());
        assert!(!store.delete(&blob.store_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_succeeds_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(dir.path().join("nested"), "/images").unwrap();
        store.validate().await.unwrap();
        assert_eq!(std::fs::read_dir(store.directory()).unwrap().count(), 0);
    }
}
