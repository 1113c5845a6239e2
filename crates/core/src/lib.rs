//! Core domain types shared by the Folio archive crates.
//!
//! This crate defines the pieces every layer agrees on:
//! - Content hashes and the hashing tee writer
//! - Handle identifiers and access modes
//! - Configuration types

pub mod config;
pub mod error;
pub mod handle;
pub mod hash;

pub use config::{AppConfig, MetadataConfig, StorageConfig};
pub use error::{Error, Result};
pub use handle::{FileMode, HandleId};
pub use hash::{ContentHash, ContentHasher, HashingWriter};

/// Name of the system tag attached to every newly created file.
pub const TAG_UNFILED: &str = "unfiled";
