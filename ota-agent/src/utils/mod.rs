//! Utility modules for the OTA agent.

pub mod device_id;
pub mod errors;
pub mod logger;

pub use errors::{OtaError, Result};
