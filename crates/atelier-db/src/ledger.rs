//! Per-operation record of blobs to clean up.
//!
//! A write operation stages new blobs before its transaction opens and
//! retires old blobs that the transaction unlinks. Exactly one of the two
//! lists is purged once the transaction settles: staged blobs on abort,
//! retired blobs on commit.

use std::path::PathBuf;

use tracing::{debug, error, warn};

use atelier_core::{BlobStore, ImagePayload, Result, StoredBlob};

pub(crate) struct BlobLedger<'s> {
    store: &'s dyn BlobStore,
    staged: Vec<StoredBlob>,
    retired: Vec<String>,
}

impl<'s> BlobLedger<'s> {
    pub(crate) fn new(store: &'s dyn BlobStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Write one payload. On failure every blob staged so far is purged
    /// before the error is returned.
    pub(crate) async fn stage(&mut self, payload: &ImagePayload) -> Result<String> {
        match self.store.put(&payload.filename, &payload.bytes).await {
            Ok(blob) => {
                let uri = blob.uri.clone();
                self.staged.push(blob);
                Ok(uri)
            }
            Err(err) => {
                warn!(
                    subsystem = "blob",
                    component = "ledger",
                    op = "stage",
                    filename = %payload.filename,
                    error = %err,
                    "Blob write failed, discarding staged blobs"
                );
                self.purge_staged().await;
                Err(err)
            }
        }
    }

    pub(crate) async fn stage_all(&mut self, payloads: &[ImagePayload]) -> Result<Vec<String>> {
        let mut uris = Vec::with_capacity(payloads.len());
        for payload in payloads {
            uris.push(self.stage(payload).await?);
        }
        if !payloads.is_empty() {
            debug!(subsystem = "blob", component = "ledger", blob_count = uris.len(), "Blobs staged");
        }
        Ok(uris)
    }

    /// Mark a uri for deletion once the transaction commits.
    pub(crate) fn retire(&mut self, uri: impl Into<String>) {
        self.retired.push(uri.into());
    }

    pub(crate) fn retire_all<I>(&mut self, uris: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.retired.extend(uris);
    }

    /// Delete everything staged by this operation. Returns paths left behind.
    pub(crate) async fn purge_staged(&mut self) -> Vec<PathBuf> {
        let paths: Vec<PathBuf> = self.staged.drain(..).map(|b| b.store_path).collect();
        self.delete_paths(paths, "purge_staged").await
    }

    /// Delete every retired blob. Returns paths left behind.
    pub(crate) async fn purge_retired(&mut self) -> Vec<PathBuf> {
        let mut leftovers = Vec::new();
        let mut paths = Vec::with_capacity(self.retired.len());
        for uri in self.retired.drain(..) {
            match self.store.resolve(&uri) {
                Some(path) => paths.push(path),
                None => {
                    error!(
                        subsystem = "blob",
                        component = "ledger",
                        blob_uri = %uri,
                        "Retired uri does not map to a store path, blob not purged"
                    );
                    leftovers.push(PathBuf::from(uri));
                }
            }
        }
        leftovers.extend(self.delete_paths(paths, "purge_retired").await);
        leftovers
    }

    async fn delete_paths(&self, paths: Vec<PathBuf>, op: &'static str) -> Vec<PathBuf> {
        let total = paths.len();
        let mut leftovers = Vec::new();
        for path in paths {
            if let Err(err) = self.store.delete(&path).await {
                error!(
                    subsystem = "blob",
                    component = "ledger",
                    op,
                    store_path = %path.display(),
                    error = %err,
                    "Blob could not be deleted"
                );
                leftovers.push(path);
            }
        }
        if total > 0 {
            debug!(
                subsystem = "blob",
                component = "ledger",
                op,
                blob_count = total - leftovers.len(),
                "Blobs purged"
            );
        }
        leftovers
    }
}
