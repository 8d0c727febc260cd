//! Moves verified, staged payload files into their live locations.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::fs::metadata::make_executable;
use crate::manifest::UpdateFile;
use crate::utils::errors::{OtaError, Result};

/// A downloaded and verified file waiting to be installed.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub staged: PathBuf,
    pub file: UpdateFile,
}

/// Install every staged file in order. The first failure stops the run and
/// leaves earlier files in place.
pub fn install_all(staged: &[StagedFile]) -> Result<usize> {
    let total = staged.len();
    for (applied, item) in staged.iter().enumerate() {
        if let Err(e) = install_file(&item.staged, &item.file.destination, item.file.executable) {
            error!(
                "Failed to install {}: {}",
                item.file.destination.display(),
                e
            );
            return Err(OtaError::PartialFailure {
                applied,
                total,
                reason: format!("{}: {}", item.file.destination.display(), e),
            });
        }
        info!("Installed {}", item.file.destination.display());
    }
    Ok(total)
}

/// Copy next to the destination, then rename over it so a running binary
/// is replaced atomically.
pub fn install_file(staged: &Path, destination: &Path, executable: bool) -> std::io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(parent)?;

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "payload".to_string());
    let incoming = parent.join(format!(".{}.ota-new", file_name));

    let result = fs::copy(staged, &incoming).and_then(|_| {
        if executable {
            make_executable(&incoming)?;
        }
        fs::rename(&incoming, destination)
    });

    if result.is_err() {
        let _ = fs::remove_file(&incoming);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged(temp: &TempDir, name: &str, body: &[u8], destination: PathBuf) -> StagedFile {
        let path = temp.path().join("staging").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        StagedFile {
            staged: path,
            file: UpdateFile {
                remote_path: format!("files/1.1.0/{}", name),
                destination,
                checksum: None,
                size_bytes: body.len() as u64,
                executable: name.ends_with(".bin"),
            },
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_install_replaces_and_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("opt/robot-ai/app.bin");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"old").unwrap();

        let items = vec![staged(&temp, "app.bin", b"new", dest.clone())];
        assert_eq!(install_all(&items).unwrap(), 1);

        assert_eq!(fs::read(&dest).unwrap(), b"new");
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert!(!dest.parent().unwrap().join(".app.bin.ota-new").exists());
    }

    #[test]
    fn test_failure_leaves_earlier_files() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("opt/a.txt");
        let mut items = vec![
            staged(&temp, "a.txt", b"a", first.clone()),
            staged(&temp, "b.txt", b"b", temp.path().join("opt/b.txt")),
        ];
        items[1].staged = temp.path().join("staging/vanished.txt");

        match install_all(&items) {
            Err(OtaError::PartialFailure { applied, total, .. }) => {
                assert_eq!(applied, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
        assert_eq!(fs::read(&first).unwrap(), b"a");
    }
}
