//! SD Sync Agent Library
//!
//! Copies media that is missing on a storage target from a camera or SD card
//! mount, one file at a time, with progress reporting, capture-time
//! preservation and cooperative cancellation.

pub mod api;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod job;
pub mod store;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::SyncError;
pub use utils::Result;
