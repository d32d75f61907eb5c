//! Core data models for the atelier content store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Kind of content entity that owns attachments.
///
/// Persisted as lowercase text in the `owner_kind` column of the shared
/// attachment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Portfolio,
    Essay,
    Profile,
}

impl OwnerKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Portfolio => "portfolio",
            OwnerKind::Essay => "essay",
            OwnerKind::Profile => "profile",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "portfolio" => Ok(OwnerKind::Portfolio),
            "essay" => Ok(OwnerKind::Essay),
            "profile" => Ok(OwnerKind::Profile),
            other => Err(Error::InvalidInput(format!("unknown owner kind: {other}"))),
        }
    }
}

// =============================================================================
// ATTACHMENTS & BLOBS
// =============================================================================

/// One row of the attachment index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    #[serde(rename = "uri")]
    pub blob_uri: String,
    /// Zero-based display position, dense within the owner partition.
    pub order: i64,
}

/// A blob written to durable storage.
///
/// `store_path` is never persisted; it can always be recomputed from `uri`
/// through the blob store that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub uri: String,
    pub store_path: PathBuf,
}

/// Raw image bytes plus the filename the client supplied.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Decode a payload that arrived base64 encoded.
    ///
    /// Decode failures surface as [`Error::Io`] with `InvalidData`, the same
    /// kind a failed blob write produces.
    pub fn from_base64(filename: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::new(filename, bytes))
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// =============================================================================
// CONTENT ENTITIES
// =============================================================================

/// Portfolio entry: a title plus an ordered image gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub title: String,
    pub images: Vec<AttachmentRecord>,
}

/// Essay with body text, a thumbnail and inline images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Essay {
    pub id: i64,
    pub title: String,
    pub thumbnail: Option<String>,
    pub body: String,
    pub images: Vec<AttachmentRecord>,
}

/// Essay list projection without body or images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssaySummary {
    pub id: i64,
    pub title: String,
    pub thumbnail: Option<String>,
}

/// The singleton "about" profile. Every field is empty until first written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub image: Option<String>,
    pub name: Option<String>,
    pub contact: Option<String>,
    pub introduction: Option<String>,
}

/// One line of the profile's history section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileHistoryEntry {
    pub id: i64,
    pub category: String,
    pub duration: String,
    pub content: String,
}

/// Editable fields of a history entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryContent {
    pub category: String,
    pub duration: String,
    pub content: String,
}

/// Account record. `refresh_token` is owned by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
}

// =============================================================================
// WRITE OUTCOMES
// =============================================================================

/// Result of a committed update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Attachment uris removed from the entity (their blobs are already purged).
    pub removed_uris: Vec<String>,
    /// Previous singleton image uri, when a new one replaced it.
    pub replaced_image: Option<String>,
    /// Store paths whose post-commit deletion failed.
    pub unpurged: Vec<PathBuf>,
}

/// Result of a committed removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Every blob uri the removed entity referenced.
    pub purged_uris: Vec<String>,
    /// Store paths whose post-commit deletion failed.
    pub unpurged: Vec<PathBuf>,
}
