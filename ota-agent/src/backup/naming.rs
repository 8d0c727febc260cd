//! Archive filename convention:
//! `<prefix>_<version>_<device_id>_<YYYYMMDD_HHMMSS>.tar.zst`

use chrono::NaiveDateTime;

pub const ARCHIVE_EXT: &str = "tar.zst";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

pub fn archive_name(prefix: &str, version: &str, device_id: &str, at: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        prefix,
        sanitize(version),
        device_id,
        at.format(TIMESTAMP_FORMAT),
        ARCHIVE_EXT
    )
}

/// Recover `(version, created_at)` from a filename belonging to `device_id`.
/// Names for other devices, other prefixes, or partial writes yield `None`.
pub fn parse_archive_name(
    name: &str,
    prefix: &str,
    device_id: &str,
) -> Option<(String, NaiveDateTime)> {
    let stem = name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(ARCHIVE_EXT)?
        .strip_suffix('.')?;

    if stem.len() < TIMESTAMP_LEN || !stem.is_char_boundary(stem.len() - TIMESTAMP_LEN) {
        return None;
    }
    let (rest, timestamp) = stem.split_at(stem.len() - TIMESTAMP_LEN);
    let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

    let version = rest.strip_suffix(&format!("_{}_", device_id))?;
    if version.is_empty() {
        return None;
    }

    Some((version.to_string(), created_at))
}

fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '-' } else { c })
        .collect()
}
