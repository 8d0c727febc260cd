//! Release catalog built from the package directory.
//!
//! Layout: `<package_dir>/<version>/release.json` plus the payloads under
//! `<package_dir>/<version>/files/<name>`. Sizes and SHA-256 checksums are
//! computed from the payloads at load time.

use crate::models::release::{Manifest, ManifestFile, ReleaseSpec};
use anyhow::{bail, Context};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct Catalog {
    root: PathBuf,
    releases: BTreeMap<String, Manifest>,
    latest: Option<String>,
}

impl Catalog {
    /// Scan `root`. A version directory that fails to load is skipped with
    /// a warning; a missing root yields an empty catalog.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let mut catalog = Catalog {
            root: root.to_path_buf(),
            ..Catalog::default()
        };
        if !root.exists() {
            tracing::warn!("Package directory {} does not exist", root.display());
            return Ok(catalog);
        }

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match load_release(&entry.path()) {
                Ok(manifest) => {
                    tracing::info!(
                        version = %manifest.version,
                        files = manifest.files.len(),
                        "Loaded release"
                    );
                    catalog.releases.insert(manifest.version.clone(), manifest);
                }
                Err(e) => tracing::warn!("Skipping {}: {:#}", entry.path().display(), e),
            }
        }

        catalog.latest = catalog
            .releases
            .keys()
            .max_by(|a, b| compare_versions(a, b))
            .cloned();
        Ok(catalog)
    }

    pub fn latest(&self) -> Option<&Manifest> {
        self.latest.as_ref().and_then(|v| self.releases.get(v))
    }

    pub fn get(&self, version: &str) -> Option<&Manifest> {
        self.releases.get(version)
    }

    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.releases.keys().cloned().collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions
    }

    /// On-disk path of a published payload, if the release lists it.
    pub fn payload_path(&self, version: &str, name: &str) -> Option<PathBuf> {
        let manifest = self.releases.get(version)?;
        let wanted = format!("files/{}/{}", version, name);
        manifest
            .files
            .iter()
            .any(|f| f.path == wanted)
            .then(|| self.root.join(version).join("files").join(name))
    }
}

fn load_release(dir: &Path) -> anyhow::Result<Manifest> {
    let release_path = dir.join("release.json");
    let body = std::fs::read(&release_path)
        .with_context(|| format!("reading {}", release_path.display()))?;
    let release: ReleaseSpec = serde_json::from_slice(&body)
        .with_context(|| format!("parsing {}", release_path.display()))?;

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let version = release.version.unwrap_or(dir_name);
    let Some(release_date) = release.release_date else {
        bail!("release {} has no release_date", version);
    };

    let mut files = Vec::with_capacity(release.files.len());
    for file in release.files {
        if file.name.contains('/') || file.name.contains("..") {
            bail!("invalid payload name '{}'", file.name);
        }
        let payload = dir.join("files").join(&file.name);
        let (checksum, size_bytes) = sha256_file(&payload)
            .with_context(|| format!("hashing {}", payload.display()))?;
        files.push(ManifestFile {
            path: format!("files/{}/{}", version, file.name),
            destination: file.destination,
            checksum,
            size_bytes,
            executable: file.executable,
        });
    }

    Ok(Manifest {
        version,
        release_date,
        severity: release.severity,
        release_notes: release.release_notes,
        features: release.features,
        files,
    })
}

fn sha256_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Semantic-version order; falls back to string order when either side
/// does not parse.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub fn write_release(root: &Path, version: &str, files: &[(&str, &[u8])]) {
        let dir = root.join(version);
        std::fs::create_dir_all(dir.join("files")).unwrap();
        let listed: Vec<_> = files
            .iter()
            .map(|(name, body)| {
                std::fs::write(dir.join("files").join(name), body).unwrap();
                serde_json::json!({
                    "name": name,
                    "destination": format!("/opt/robot-ai/{}", name),
                    "executable": name.ends_with(".bin"),
                })
            })
            .collect();
        let release_json = serde_json::json!({
            "version": version,
            "release_date": "2024-05-01",
            "severity": "security",
            "release_notes": format!("Release {}", version),
            "files": listed,
        });
        std::fs::write(dir.join("release.json"), release_json.to_string()).unwrap();
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_load_computes_checksums_and_latest() {
        let temp = TempDir::new().unwrap();
        write_release(temp.path(), "1.9.0", &[("app.bin", b"old")]);
        write_release(temp.path(), "1.10.0", &[("app.bin", b"new"), ("config.yaml", b"x")]);
        std::fs::create_dir_all(temp.path().join("broken")).unwrap();

        let catalog = Catalog::load(temp.path()).unwrap();
        assert_eq!(catalog.versions(), vec!["1.9.0", "1.10.0"]);

        let latest = catalog.latest().unwrap();
        assert_eq!(latest.version, "1.10.0");
        assert_eq!(latest.files[0].path, "files/1.10.0/app.bin");
        assert_eq!(latest.files[0].size_bytes, 3);
        assert_eq!(
            latest.files[0].checksum,
            hex::encode(Sha256::digest(b"new"))
        );
        assert!(latest.files[0].executable);

        assert!(catalog.payload_path("1.10.0", "config.yaml").is_some());
        assert!(catalog.payload_path("1.10.0", "secret.key").is_none());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = Catalog::load(&temp.path().join("nope")).unwrap();
        assert!(catalog.latest().is_none());
    }
}
