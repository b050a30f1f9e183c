//! File transfer engine and progress reporting.

pub mod engine;
pub mod progress;
