//! OTA Agent Library
//!
//! Update-lifecycle daemon: periodic release checks, scheduled installs with
//! a snapshot before every change, checksum-verified downloads, rollback and
//! best-effort status reporting.

pub mod api;
pub mod backup;
pub mod command;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod manifest;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
pub mod state_store;
pub mod transport;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{OtaError, Result};
