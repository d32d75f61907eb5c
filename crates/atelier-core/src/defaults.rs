//! Centralized default constants for the atelier content store.
//!
//! Every crate reads shared defaults from here instead of defining its own
//! magic values.

// =============================================================================
// STORAGE
// =============================================================================

/// Default relational store location.
pub const DATABASE_URL: &str = "sqlite://atelier.db";

/// Default directory holding image blobs.
pub const IMAGE_STORAGE_PATH: &str = "./assets/images";

/// Public uri prefix under which image blobs are served.
pub const IMAGE_URI_PREFIX: &str = "/images";

/// Default upper bound on pooled SQLite connections.
pub const DB_MAX_CONNECTIONS: u32 = 5;

// =============================================================================
// LOGGING
// =============================================================================

/// Env filter used when `RUST_LOG` is unset.
pub const LOG_FILTER: &str = "atelier_db=info,atelier_core=info";

/// File name used when `LOG_FILE` names a directory only.
pub const LOG_FILE_NAME: &str = "atelier.log";
