use serde::{Deserialize, Serialize};

/// `release.json` inside a version directory.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseSpec {
    pub version: Option<String>,
    pub release_date: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub features: Option<String>,
    #[serde(default)]
    pub files: Vec<ReleaseFile>,
}

fn default_severity() -> String {
    "regular".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFile {
    /// File name under `<version>/files/`
    pub name: String,
    /// Absolute install path on the device
    pub destination: String,
    #[serde(default)]
    pub executable: bool,
}

/// Manifest as served to devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub release_date: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Relative to the server base URL
    pub path: String,
    pub destination: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub executable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failed,
}

/// Body of `POST /report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub device_id: String,
    pub product_type: String,
    pub version: String,
    pub status: ReportStatus,
    pub message: String,
    pub timestamp: i64,
}
