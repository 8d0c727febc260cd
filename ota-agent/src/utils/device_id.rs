//! Stable device identifier derived from hardware.
//!
//! The id is the first eight hex digits of the SHA-256 of the primary
//! interface MAC address, rendered as `XXXX-XXXX`. It is persisted so that a
//! NIC swap does not re-key existing backups.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const INTERFACES: &[&str] = &["eth0", "wlan0"];

/// Read the MAC address of the first known interface.
fn mac_address(sys_net: &Path) -> Option<String> {
    INTERFACES.iter().find_map(|iface| {
        let path = sys_net.join(iface).join("address");
        let mac = fs::read_to_string(&path).ok()?.trim().to_string();
        if mac.is_empty() || mac == "00:00:00:00:00:00" {
            return None;
        }
        debug!("Found MAC address {} in {}", mac, path.display());
        Some(mac)
    })
}

/// Format a device id from arbitrary seed material.
pub fn format_device_id(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    format!("{}-{}", &digest[..4], &digest[4..8]).to_uppercase()
}

fn generate(sys_net: &Path) -> String {
    let seed = mac_address(sys_net)
        .or_else(|| {
            warn!("No MAC address found, falling back to hostname");
            hostname::get().ok().and_then(|h| h.into_string().ok())
        })
        .unwrap_or_else(|| {
            warn!("No hostname available, using a random device seed");
            uuid::Uuid::new_v4().to_string()
        });
    format_device_id(&seed)
}

/// Load the persisted device id from `id_file`, generating and saving one if needed.
pub fn load_or_create(id_file: &Path) -> String {
    load_or_create_with(id_file, Path::new("/sys/class/net"))
}

fn load_or_create_with(id_file: &Path, sys_net: &Path) -> String {
    if let Ok(existing) = fs::read_to_string(id_file) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = generate(sys_net);
    info!("Generated device id {}", id);

    if let Some(parent) = id_file.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Cannot create {}: {}", parent.display(), e);
        }
    }
    if let Err(e) = fs::write(id_file, &id) {
        warn!("Failed to persist device id to {}: {}", id_file.display(), e);
    }

    id
}
