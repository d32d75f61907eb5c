//! # atelier-core
//!
//! Core types, traits, and abstractions for the atelier content store.
//!
//! This crate provides the data structures and trait definitions that the
//! storage crate implements: content entities and their attachments, the
//! blob store contract, repository traits, the error type, and the shared
//! logging and configuration conventions.

pub mod config;
pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use file_safety::{sanitize_filename, split_filename_hint};
pub use models::*;
pub use traits::*;
