//! JSON-file stores consulted by the core.
//!
//! Both documents are maintained by outside tooling; the agent only reads them.

pub mod devices;
pub mod renames;

pub use devices::{DeviceConfig, DeviceStore};
pub use renames::{RenameOverlay, RenameStore};
