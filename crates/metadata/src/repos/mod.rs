//! Repository traits for metadata operations.

pub mod content;
pub mod files;
pub mod tags;

pub use content::ContentRepo;
pub use files::FileRepo;
pub use tags::TagRepo;
