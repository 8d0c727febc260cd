//! Release manifest published by the update server.
//!
//! The wire shape is permissive (every field optional);
//! [`Manifest::from_slice`] turns it into a validated, immutable manifest or
//! rejects it wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

use crate::utils::errors::{OtaError, Result};

/// Priority classification of a release. Only used for notification framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Security,
    #[default]
    Regular,
    Feature,
}

impl Severity {
    /// Unknown labels degrade to `Regular`.
    pub fn parse_lenient(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "security" => Severity::Security,
            "regular" => Severity::Regular,
            "feature" => Severity::Feature,
            other => {
                warn!("Unknown severity '{}', using regular", other);
                Severity::Regular
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "critical",
            Severity::Security => "security",
            Severity::Regular => "regular",
            Severity::Feature => "feature",
        };
        f.write_str(label)
    }
}

/// One payload item of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateFile {
    pub remote_path: String,
    pub destination: PathBuf,
    pub checksum: Option<String>,
    pub size_bytes: u64,
    pub executable: bool,
}

/// Validated release description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub release_date: String,
    pub severity: Severity,
    pub release_notes: Option<String>,
    pub features: Option<String>,
    pub files: Vec<UpdateFile>,
}

#[derive(Debug, Deserialize)]
struct WireManifest {
    version: Option<String>,
    release_date: Option<String>,
    severity: Option<String>,
    release_notes: Option<String>,
    features: Option<String>,
    #[serde(default)]
    files: Vec<WireFile>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    path: String,
    destination: String,
    checksum: Option<String>,
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    executable: bool,
}

impl Manifest {
    /// Parse and validate a manifest body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let wire: WireManifest = serde_json::from_slice(body)
            .map_err(|e| OtaError::Manifest(format!("malformed manifest: {}", e)))?;

        let version = required(wire.version, "version")?;
        let release_date = required(wire.release_date, "release_date")?;

        let files = wire
            .files
            .into_iter()
            .map(|f| {
                let destination = PathBuf::from(&f.destination);
                if !destination.is_absolute() {
                    return Err(OtaError::Manifest(format!(
                        "destination for '{}' is not absolute: {}",
                        f.path, f.destination
                    )));
                }
                Ok(UpdateFile {
                    remote_path: f.path,
                    destination,
                    checksum: f.checksum.filter(|c| !c.trim().is_empty()),
                    size_bytes: f.size_bytes,
                    executable: f.executable,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Manifest {
            version,
            release_date,
            severity: wire
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or_default(),
            release_notes: wire.release_notes,
            features: wire.features,
            files,
        })
    }

    /// Sum of declared payload sizes in bytes.
    pub fn total_size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OtaError::Manifest(format!("missing required field: {}", field))),
    }
}
