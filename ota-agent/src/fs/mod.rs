//! Filesystem helpers shared by backup and install.

pub mod metadata;
pub mod walker;

use std::fs;
use std::path::Path;

use metadata::{copy_file_preserving, FileMetadata};
use walker::{walk_directory, ExcludeSet};

/// Recursively copy `src` into `dst`, skipping excluded entries.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, excludes: &ExcludeSet) -> std::io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    let mut dirs = Vec::new();

    for entry in walk_directory(src, excludes)? {
        let target = dst.join(&entry.relative_path);
        if entry.is_symlink {
            copy_symlink(&entry.path, &target)?;
        } else if entry.is_dir {
            fs::create_dir_all(&target)?;
            dirs.push((entry.path, target));
        } else {
            copy_file_preserving(&entry.path, &target)?;
            copied += 1;
        }
    }

    // Directory mtimes change as children land, so stamp them last.
    for (source, target) in dirs.iter().rev() {
        FileMetadata::from_path(source)?.apply_to_path(target)?;
    }

    Ok(copied)
}

/// Remove everything inside `dir` except excluded entries, keeping `dir` itself.
/// Returns true when something was kept.
pub fn clear_directory(dir: &Path, excludes: &ExcludeSet) -> std::io::Result<bool> {
    clear_below(dir, Path::new(""), excludes)
}

fn clear_below(dir: &Path, relative: &Path, excludes: &ExcludeSet) -> std::io::Result<bool> {
    let mut kept = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = relative.join(entry.file_name());
        if excludes.is_excluded(&rel) {
            kept = true;
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if clear_below(&path, &rel, excludes)? {
                kept = true;
            } else {
                fs::remove_dir(&path)?;
            }
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(kept)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let target = fs::read_link(src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    copy_file_preserving(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_with_excludes() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("config/logs"))?;
        fs::write(src.join("config/app.toml"), b"x = 1")?;
        fs::write(src.join("config/logs/today.txt"), b"noise")?;
        fs::write(src.join("debug.log"), b"noise")?;

        let copied = copy_tree(&src, &dst, &ExcludeSet::new(&["logs", "*.log"]))?;

        assert_eq!(copied, 1);
        assert_eq!(fs::read(dst.join("config/app.toml"))?, b"x = 1");
        assert!(!dst.join("config/logs").exists());
        assert!(!dst.join("debug.log").exists());
        Ok(())
    }

    #[test]
    fn test_clear_directory_keeps_root() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let dir = temp.path().join("app");
        fs::create_dir_all(dir.join("nested"))?;
        fs::write(dir.join("a.txt"), b"a")?;
        fs::write(dir.join("nested/b.txt"), b"b")?;

        clear_directory(&dir, &ExcludeSet::default())?;

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_clear_directory_spares_excluded() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let dir = temp.path().join("app");
        fs::create_dir_all(dir.join("models/cv"))?;
        fs::create_dir_all(dir.join("models/nlp"))?;
        fs::write(dir.join("models/cv/weights.bin"), b"w")?;
        fs::write(dir.join("models/nlp/vocab.txt"), b"v")?;
        fs::write(dir.join("main.py"), b"m")?;

        let kept = clear_directory(&dir, &ExcludeSet::new(&["models/cv"]))?;

        assert!(kept);
        assert!(dir.join("models/cv/weights.bin").exists());
        assert!(!dir.join("models/nlp").exists());
        assert!(!dir.join("main.py").exists());
        Ok(())
    }
}
