//! Core traits for atelier abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, so callers can hold `dyn` handles and tests can swap in
//! fault-injecting doubles.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::*;

// =============================================================================
// BLOB STORE
// =============================================================================

/// Durable storage for raw image bytes.
///
/// Knows nothing about metadata. Only content repositories request deletion.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under a freshly generated name derived from `filename_hint`.
    ///
    /// Never overwrites an existing blob and leaves no partial file behind
    /// when it fails.
    async fn put(&self, filename_hint: &str, bytes: &[u8]) -> Result<StoredBlob>;

    /// Delete the blob at `store_path`.
    ///
    /// Idempotent: an absent file is not an error. Returns whether a file was
    /// actually removed.
    async fn delete(&self, store_path: &Path) -> Result<bool>;

    /// Check whether a blob exists at `store_path`.
    async fn exists(&self, store_path: &Path) -> Result<bool>;

    /// Map a public uri produced by [`BlobStore::put`] back to its store path.
    ///
    /// Returns `None` for uris this store did not issue.
    fn resolve(&self, uri: &str) -> Option<PathBuf>;
}

// =============================================================================
// PORTFOLIO REPOSITORY
// =============================================================================

/// Request for creating a portfolio entry.
#[derive(Debug, Clone)]
pub struct CreatePortfolioRequest {
    pub title: String,
    pub images: Vec<ImagePayload>,
}

/// Partial update of a portfolio entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePortfolioRequest {
    pub title: Option<String>,
    pub remove_image_ids: Option<Vec<i64>>,
    pub add_images: Option<Vec<ImagePayload>>,
}

#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn create(&self, req: CreatePortfolioRequest) -> Result<i64>;
    async fn find(&self, id: i64) -> Result<Portfolio>;
    async fn list(&self) -> Result<Vec<Portfolio>>;
    async fn update(&self, id: i64, req: UpdatePortfolioRequest) -> Result<UpdateOutcome>;
    async fn remove(&self, id: i64) -> Result<RemoveOutcome>;
}

// =============================================================================
// ESSAY REPOSITORY
// =============================================================================

/// Request for creating an essay. The thumbnail is mandatory.
#[derive(Debug, Clone)]
pub struct CreateEssayRequest {
    pub title: String,
    pub body: String,
    pub thumbnail: ImagePayload,
    pub images: Vec<ImagePayload>,
}

/// Partial update of an essay. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateEssayRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub thumbnail: Option<ImagePayload>,
    pub remove_image_ids: Option<Vec<i64>>,
    pub add_images: Option<Vec<ImagePayload>>,
}

#[async_trait]
pub trait EssayRepository: Send + Sync {
    async fn create(&self, req: CreateEssayRequest) -> Result<i64>;
    async fn find(&self, id: i64) -> Result<Essay>;
    async fn list_summaries(&self) -> Result<Vec<EssaySummary>>;
    async fn update(&self, id: i64, req: UpdateEssayRequest) -> Result<UpdateOutcome>;
    async fn remove(&self, id: i64) -> Result<RemoveOutcome>;
}

// =============================================================================
// PROFILE REPOSITORY
// =============================================================================

/// Partial update of the singleton profile.
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub image: Option<ImagePayload>,
    pub name: Option<String>,
    pub contact: Option<String>,
    pub introduction: Option<String>,
}

/// Replacement content for an existing history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryUpdate {
    pub id: i64,
    #[serde(flatten)]
    pub content: HistoryContent,
}

/// Batch edit of the profile history, applied in one transaction.
#[derive(Debug, Clone, Default)]
pub struct UpdateHistoryRequest {
    pub remove_ids: Vec<i64>,
    pub updates: Vec<HistoryUpdate>,
    pub additions: Vec<HistoryContent>,
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Current profile; empty when it was never written.
    async fn get(&self) -> Result<Profile>;
    /// Update the profile, creating it on first write.
    async fn update(&self, req: UpdateProfileRequest) -> Result<UpdateOutcome>;
    /// History entries in insertion order.
    async fn history(&self) -> Result<Vec<ProfileHistoryEntry>>;
    async fn update_history(&self, req: UpdateHistoryRequest) -> Result<()>;
}

// =============================================================================
// USER REPOSITORY
// =============================================================================

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user from a plaintext password; only its digest is stored.
    async fn create(&self, username: &str, password: &str) -> Result<i64>;
    /// Create a user from an already computed password digest.
    async fn create_with_digest(&self, username: &str, digest: &str) -> Result<i64>;
    async fn find(&self, id: i64) -> Result<User>;
    async fn find_by_username(&self, username: &str) -> Result<User>;
    async fn exists(&self, username: &str) -> Result<bool>;
    async fn set_refresh_token(&self, id: i64, token: &str) -> Result<()>;
    async fn clear_refresh_token(&self, id: i64) -> Result<()>;
}
