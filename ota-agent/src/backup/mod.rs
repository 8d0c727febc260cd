//! Point-in-time snapshots of the device's application and configuration.
//!
//! A backup stages every configured source location into a scratch
//! directory, seals it into a zstd-compressed tar archive, verifies the
//! archive and only then gives it its final name. All operations on one
//! store are serialised, so retention never runs while a restore is reading.
//!
//! Every method here does blocking I/O; async callers go through
//! `tokio::task::spawn_blocking`.

pub mod naming;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::config::BackupConfig;
use crate::fs::metadata::copy_file_preserving;
use crate::fs::walker::ExcludeSet;
use crate::fs::{clear_directory, copy_tree};
use crate::utils::errors::{OtaError, Result};
use naming::{archive_name, parse_archive_name};

const ZSTD_LEVEL: i32 = 3;

/// One archive on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    /// Version that was installed when the snapshot was taken
    pub version_label: String,
    pub device_id: String,
    pub created_at: NaiveDateTime,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip)]
    modified: SystemTime,
}

/// Per-location outcome of a restore.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub struct BackupStore {
    dir: PathBuf,
    sources: Vec<PathBuf>,
    excludes: ExcludeSet,
    retention: usize,
    prefix: String,
    device_id: String,
    op_lock: Mutex<()>,
}

impl BackupStore {
    pub fn new(config: &BackupConfig, device_id: &str) -> Self {
        Self {
            dir: config.dir.clone(),
            sources: config.sources.clone(),
            excludes: ExcludeSet::new(&config.exclude),
            retention: config.retention_count,
            prefix: config.prefix.clone(),
            device_id: device_id.to_string(),
            op_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot every source location, labelled with the version being superseded.
    pub fn create_backup(&self, version_label: &str) -> Result<PathBuf> {
        self.create_backup_at(version_label, chrono::Local::now().naive_local())
    }

    fn create_backup_at(&self, version_label: &str, at: NaiveDateTime) -> Result<PathBuf> {
        let _guard = self.op_lock.lock();

        fs::create_dir_all(&self.dir)?;
        let name = archive_name(&self.prefix, version_label, &self.device_id, at);
        let final_path = self.dir.join(&name);
        let partial_path = self.dir.join(format!("{}.partial", name));

        info!("Creating backup at {}", final_path.display());

        let staging = tempfile::Builder::new().prefix("ota-backup-").tempdir()?;
        self.stage_sources(staging.path())
            .map_err(|e| OtaError::Backup(format!("staging failed: {}", e)))?;

        if let Err(e) = write_archive(staging.path(), &partial_path) {
            let _ = fs::remove_file(&partial_path);
            return Err(OtaError::Backup(format!("archive write failed: {}", e)));
        }

        if !verify_archive(&partial_path) {
            let _ = fs::remove_file(&partial_path);
            error!("Backup verification failed: {}", final_path.display());
            return Err(OtaError::Integrity("Backup verification failed".into()));
        }

        if let Err(e) = fs::rename(&partial_path, &final_path) {
            let _ = fs::remove_file(&partial_path);
            return Err(OtaError::Backup(format!(
                "could not move archive into place: {}",
                e
            )));
        }
        info!("Backup created successfully: {}", final_path.display());

        // The archive just written is always among those kept.
        if let Err(e) = self.prune_locked(self.retention.max(1)) {
            error!("Error cleaning up old backups: {}", e);
        }

        Ok(final_path)
    }

    fn stage_sources(&self, staging: &Path) -> io::Result<()> {
        for source in &self.sources {
            if !source.exists() {
                warn!("Backup location {} does not exist, skipping", source.display());
                continue;
            }

            let dest = staging.join(archive_relative(source));
            if source.is_file() {
                copy_file_preserving(source, &dest)?;
            } else {
                let copied = copy_tree(source, &dest, &self.excludes)?;
                debug!("Staged {} files from {}", copied, source.display());
            }
        }
        Ok(())
    }

    /// True when `path` is a readable archive with at least one content entry.
    pub fn verify_backup(&self, path: &Path) -> bool {
        let _guard = self.op_lock.lock();
        verify_archive(path)
    }

    /// Restore every source location from the archive at `path`.
    ///
    /// Fails only when the archive cannot be extracted; individual locations
    /// that are missing from the archive or fail to copy are reported.
    pub fn restore_backup(&self, path: &Path) -> Result<RestoreReport> {
        let _guard = self.op_lock.lock();

        if !path.exists() {
            return Err(OtaError::Backup(format!(
                "Backup file does not exist: {}",
                path.display()
            )));
        }

        info!("Restoring backup from {}", path.display());
        let extracted = tempfile::Builder::new().prefix("ota-restore-").tempdir()?;
        extract_archive(path, extracted.path())
            .map_err(|e| OtaError::Backup(format!("extraction failed: {}", e)))?;

        let mut report = RestoreReport::default();
        for location in &self.sources {
            let src = extracted.path().join(archive_relative(location));
            if !src.exists() {
                warn!("Backup does not contain {}, skipping", location.display());
                report.skipped.push(location.clone());
                continue;
            }

            match self.restore_location(&src, location) {
                Ok(()) => report.restored.push(location.clone()),
                Err(e) => {
                    error!("Error restoring {}: {}", location.display(), e);
                    report.failed.push(location.clone());
                }
            }
        }

        info!(
            "Backup restored from {} ({} restored, {} skipped, {} failed)",
            path.display(),
            report.restored.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn restore_location(&self, src: &Path, dest: &Path) -> io::Result<()> {
        if src.is_file() {
            if dest.is_dir() {
                fs::remove_dir_all(dest)?;
            }
            copy_file_preserving(src, dest)?;
            return Ok(());
        }

        if dest.is_dir() {
            clear_directory(dest, &self.excludes)?;
        } else if dest.exists() {
            fs::remove_file(dest)?;
        }
        copy_tree(src, dest, &ExcludeSet::default())?;
        Ok(())
    }

    /// This device's backups, most recent first (by modification time).
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let _guard = self.op_lock.lock();
        self.list_locked()
    }

    fn list_locked(&self) -> Result<Vec<BackupRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((version_label, created_at)) =
                parse_archive_name(&name, &self.prefix, &self.device_id)
            else {
                continue;
            };

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            records.push(BackupRecord {
                version_label,
                device_id: self.device_id.clone(),
                created_at,
                archive_path: entry.path(),
                size_bytes: metadata.len(),
                modified: metadata.modified()?,
            });
        }

        records.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.archive_path.cmp(&a.archive_path))
        });
        Ok(records)
    }

    pub fn latest_backup(&self) -> Option<BackupRecord> {
        match self.list_backups() {
            Ok(records) => records.into_iter().next(),
            Err(e) => {
                error!("Error getting latest backup: {}", e);
                None
            }
        }
    }

    /// Apply the configured retention count. Returns how many archives were removed.
    pub fn prune(&self) -> Result<usize> {
        let _guard = self.op_lock.lock();
        self.prune_locked(self.retention)
    }

    fn prune_locked(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for old in self.list_locked()?.into_iter().skip(keep) {
            info!("Removing old backup: {}", old.archive_path.display());
            fs::remove_file(&old.archive_path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Absolute source path as stored inside the archive (`/opt/x` -> `opt/x`).
fn archive_relative(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn write_archive(staging: &Path, archive_path: &Path) -> io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut top_level: Vec<_> = fs::read_dir(staging)?.collect::<io::Result<_>>()?;
    top_level.sort_by_key(|e| e.file_name());
    for entry in top_level {
        let name = entry.file_name();
        if entry.file_type()?.is_dir() {
            builder.append_dir_all(&name, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()
}

fn verify_archive(path: &Path) -> bool {
    match count_entries(path) {
        Ok(0) => {
            error!("Backup archive is empty: {}", path.display());
            false
        }
        Ok(count) => {
            debug!("Backup archive contains {} entries", count);
            true
        }
        Err(e) => {
            error!("Error verifying backup {}: {}", path.display(), e);
            false
        }
    }
}

/// Read every entry to the end; the root directory entry is not content.
fn count_entries(path: &Path) -> io::Result<usize> {
    let metadata = fs::metadata(path)?;
    if metadata.len() == 0 {
        return Ok(0);
    }

    let decoder = zstd::Decoder::new(File::open(path)?)?;
    let mut archive = tar::Archive::new(decoder);
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        io::copy(&mut entry, &mut io::sink())?;
        let entry_path = entry.path()?;
        if entry_path.components().any(|c| matches!(c, Component::Normal(_))) {
            count += 1;
        }
    }
    Ok(count)
}

fn extract_archive(path: &Path, dest: &Path) -> io::Result<()> {
    let decoder = zstd::Decoder::new(File::open(path)?)?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const DEVICE: &str = "AB12-CD34";

    struct Fixture {
        _temp: TempDir,
        app: PathBuf,
        conf_file: PathBuf,
        store: BackupStore,
    }

    fn fixture(retention: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("opt/robot-ai");
        let conf_file = temp.path().join("etc/ota-agent.toml");
        fs::create_dir_all(app.join("bin")).unwrap();
        fs::create_dir_all(app.join("models/cv")).unwrap();
        fs::create_dir_all(conf_file.parent().unwrap()).unwrap();
        fs::write(app.join("bin/robot"), b"v1 binary").unwrap();
        fs::write(app.join("models/cv/weights.bin"), b"large").unwrap();
        fs::write(app.join("debug.log"), b"noise").unwrap();
        fs::write(&conf_file, b"[server]\n").unwrap();

        let config = BackupConfig {
            dir: temp.path().join("backups"),
            retention_count: retention,
            sources: vec![app.clone(), conf_file.clone(), temp.path().join("missing")],
            exclude: vec!["*.log".into(), "models/cv".into()],
            prefix: "robot-ai_backup".into(),
        };
        let store = BackupStore::new(&config, DEVICE);
        Fixture {
            _temp: temp,
            app,
            conf_file,
            store,
        }
    }

    #[test]
    fn test_create_verify_and_list() {
        let fx = fixture(2);

        let path = fx.store.create_backup("1.0.0").unwrap();
        assert!(path.exists());
        assert!(fx.store.verify_backup(&path));

        let backups = fx.store.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].version_label, "1.0.0");
        assert_eq!(backups[0].device_id, DEVICE);
        assert_eq!(fx.store.latest_backup().unwrap().archive_path, path);

        let leftovers: Vec<_> = fs::read_dir(fx.store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_restore_round_trip() {
        let fx = fixture(2);
        let path = fx.store.create_backup("1.0.0").unwrap();

        fs::write(fx.app.join("bin/robot"), b"v2 binary").unwrap();
        fs::write(fx.app.join("bin/new-tool"), b"added by update").unwrap();
        fs::write(&fx.conf_file, b"broken").unwrap();

        let report = fx.store.restore_backup(&path).unwrap();
        assert_eq!(report.restored.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.failed.is_empty());

        assert_eq!(fs::read(fx.app.join("bin/robot")).unwrap(), b"v1 binary");
        assert!(!fx.app.join("bin/new-tool").exists());
        assert_eq!(fs::read(&fx.conf_file).unwrap(), b"[server]\n");
        // Excluded trees were never captured and survive the restore.
        assert!(fx.app.join("models/cv/weights.bin").exists());
    }

    #[test]
    fn test_nothing_to_back_up_fails() {
        let temp = TempDir::new().unwrap();
        let config = BackupConfig {
            dir: temp.path().join("backups"),
            sources: vec![temp.path().join("absent")],
            ..BackupConfig::default()
        };
        let store = BackupStore::new(&config, DEVICE);

        assert!(matches!(store.create_backup("1.0.0"), Err(OtaError::Integrity(_))));
        assert!(store.list_backups().unwrap().is_empty());
        assert_eq!(fs::read_dir(temp.path().join("backups")).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_archive_fails_verification() {
        let fx = fixture(2);
        fs::create_dir_all(fx.store.dir()).unwrap();
        let bogus = fx.store.dir().join("bogus.tar.zst");
        fs::write(&bogus, b"definitely not zstd").unwrap();
        let empty = fx.store.dir().join("empty.tar.zst");
        fs::write(&empty, b"").unwrap();

        assert!(!fx.store.verify_backup(&bogus));
        assert!(!fx.store.verify_backup(&empty));
        assert!(matches!(fx.store.restore_backup(&bogus), Err(OtaError::Backup(_))));
    }

    #[test]
    fn test_restore_missing_archive() {
        let fx = fixture(2);
        let result = fx.store.restore_backup(Path::new("/nonexistent/backup.tar.zst"));
        assert!(matches!(result, Err(OtaError::Backup(_))));
    }

    #[test]
    fn test_foreign_device_backups_ignored() {
        let fx = fixture(2);
        fs::create_dir_all(fx.store.dir()).unwrap();
        fs::write(
            fx.store.dir().join("robot-ai_backup_1.0.0_FFFF-0000_20240101_000000.tar.zst"),
            b"other",
        )
        .unwrap();

        assert!(fx.store.list_backups().unwrap().is_empty());
        assert!(fx.store.latest_backup().is_none());
    }

    fn seed_backups(store: &BackupStore, mtimes: &[i64]) {
        fs::create_dir_all(store.dir()).unwrap();
        for (i, mtime) in mtimes.iter().enumerate() {
            let at = chrono::DateTime::from_timestamp(1_700_000_000 + i as i64 * 60, 0)
                .unwrap()
                .naive_utc();
            let path = store
                .dir()
                .join(archive_name("robot-ai_backup", &format!("1.0.{}", i), DEVICE, at));
            fs::write(&path, b"archive").unwrap();
            filetime::set_file_mtime(&path, FileTime::from_unix_time(*mtime, 0)).unwrap();
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_retention_keeps_most_recent(
            mtimes in (0usize..8).prop_flat_map(|m| {
                Just((0..m as i64).map(|i| 1_700_000_000 + i * 3600).collect::<Vec<_>>())
                    .prop_shuffle()
            }),
            keep in 0usize..6,
        ) {
            let fx = fixture(keep);
            seed_backups(&fx.store, &mtimes);

            fx.store.prune().unwrap();

            let remaining = fx.store.list_backups().unwrap();
            prop_assert_eq!(remaining.len(), mtimes.len().min(keep));

            let mut expected = mtimes.clone();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            expected.truncate(keep);
            let actual: Vec<i64> = remaining
                .iter()
                .map(|r| FileTime::from_last_modification_time(&fs::metadata(&r.archive_path).unwrap()).unix_seconds())
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }

    fn backup_dir_entries(store: &BackupStore) -> Vec<String> {
        fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_staging_failure_aborts_backup() {
        let fx = fixture(2);
        // Sockets cannot be opened for reading, even by root.
        let _socket = std::os::unix::net::UnixListener::bind(fx.app.join("agent.sock")).unwrap();

        let result = fx.store.create_backup("1.0.0");
        assert!(matches!(result, Err(OtaError::Backup(ref m)) if m.contains("staging")));
        assert!(backup_dir_entries(&fx.store).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_archive_write_failure_leaves_nothing() {
        let fx = fixture(2);
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0)
            .unwrap()
            .naive_utc();
        let name = archive_name("robot-ai_backup", "1.0.0", DEVICE, at);
        fs::create_dir_all(fx.store.dir()).unwrap();
        // Every write to /dev/full fails with ENOSPC.
        std::os::unix::fs::symlink("/dev/full", fx.store.dir().join(format!("{}.partial", name)))
            .unwrap();

        let result = fx.store.create_backup_at("1.0.0", at);
        assert!(matches!(result, Err(OtaError::Backup(ref m)) if m.contains("archive write")));
        assert!(backup_dir_entries(&fx.store).is_empty());
    }

    #[test]
    fn test_failed_rename_removes_partial() {
        let fx = fixture(2);
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0)
            .unwrap()
            .naive_utc();
        let name = archive_name("robot-ai_backup", "1.0.0", DEVICE, at);
        // A non-empty directory cannot be replaced by a file.
        let blocker = fx.store.dir().join(&name);
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        let result = fx.store.create_backup_at("1.0.0", at);
        assert!(matches!(result, Err(OtaError::Backup(_))));
        assert_eq!(backup_dir_entries(&fx.store), vec![name]);
    }

    #[test]
    fn test_zero_retention_keeps_fresh_backup() {
        let fx = fixture(0);
        seed_backups(&fx.store, &[1_600_000_000, 1_600_000_100]);

        let fresh = fx.store.create_backup("1.0.0").unwrap();

        let remaining = fx.store.list_backups().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].archive_path, fresh);
    }

    #[test]
    fn test_create_applies_retention() {
        let fx = fixture(2);
        seed_backups(&fx.store, &[1_600_000_000, 1_600_000_100, 1_600_000_200]);

        let fresh = fx.store.create_backup("1.0.0").unwrap();

        let remaining = fx.store.list_backups().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].archive_path, fresh);
        assert_eq!(remaining[1].version_label, "1.0.2");
    }
}
