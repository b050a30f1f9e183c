//! Filesystem inventory and metadata.

pub mod inventory;
pub mod metadata;
