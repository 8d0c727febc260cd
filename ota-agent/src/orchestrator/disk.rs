//! Free-space gate run before an install is scheduled.

use std::path::Path;
use tracing::info;

use crate::utils::errors::{OtaError, Result};

const MIB: f64 = 1024.0 * 1024.0;

/// Reports free space on the filesystem holding `path`.
pub trait SpaceProbe: Send + Sync {
    fn available_mb(&self, path: &Path) -> Result<f64>;
}

/// `statvfs(2)` on the target filesystem; counts blocks available to
/// unprivileged users.
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    fn available_mb(&self, path: &Path) -> Result<f64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
        Ok(bytes as f64 / MIB)
    }
}

/// Payload size plus the backup estimate and safety buffer, in MB.
pub fn required_space_mb(payload_bytes: u64, backup_estimate_mb: u64, safety_buffer_mb: u64) -> f64 {
    payload_bytes as f64 / MIB + backup_estimate_mb as f64 + safety_buffer_mb as f64
}

pub fn ensure_space(probe: &dyn SpaceProbe, path: &Path, required_mb: f64) -> Result<()> {
    let available_mb = probe.available_mb(path)?;
    info!(
        "Disk space check: required={:.2}MB, available={:.2}MB",
        required_mb, available_mb
    );

    if available_mb >= required_mb {
        Ok(())
    } else {
        Err(OtaError::InsufficientSpace {
            required_mb,
            available_mb,
        })
    }
}

#[cfg(test)]
pub(crate) struct FixedSpace(pub f64);

#[cfg(test)]
impl SpaceProbe for FixedSpace {
    fn available_mb(&self, _path: &Path) -> Result<f64> {
        Ok(self.0)
    }
}
