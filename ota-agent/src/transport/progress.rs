//! Byte-level progress for streamed downloads.

/// Tracks bytes written for one download and reports 10% boundaries.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Expected size from Content-Length, when the server sent one
    pub total_bytes: Option<u64>,

    /// Bytes written so far
    pub downloaded_bytes: u64,

    last_decile: u8,
}

impl DownloadProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes: total_bytes.filter(|t| *t > 0),
            downloaded_bytes: 0,
            last_decile: 0,
        }
    }

    /// Record `bytes` more; returns the percentage when a new 10% boundary is crossed.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.downloaded_bytes += bytes;
        let percent = self.percent()?;
        let decile = percent / 10;
        if decile > self.last_decile {
            self.last_decile = decile;
            Some(decile * 10)
        } else {
            None
        }
    }

    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes?;
        Some(((self.downloaded_bytes.min(total) * 100) / total) as u8)
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
