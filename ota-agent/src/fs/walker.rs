//! Directory traversal with exclusion rules.
//!
//! Excluded directories are pruned during the walk, so large asset trees
//! (`models/cv`) are never descended into.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Exclusion rules applied while walking a source location.
///
/// A pattern is one of:
/// - `*.ext`: matches any file name ending in `.ext`
/// - a plain name (`__pycache__`): matches any entry with exactly that name
/// - a relative sub-path (`models/cv`): matches that path below the walk root
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    suffixes: Vec<String>,
    names: Vec<String>,
    sub_paths: Vec<PathBuf>,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            if let Some(ext) = pattern.strip_prefix('*') {
                set.suffixes.push(ext.to_string());
            } else if pattern.contains('/') {
                set.sub_paths.push(PathBuf::from(pattern.trim_start_matches('/')));
            } else {
                set.names.push(pattern.to_string());
            }
        }
        set
    }

    /// `relative` is the entry's path below the walk root.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let Some(name) = relative.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        self.names.iter().any(|n| *n == name)
            || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
            || self.sub_paths.iter().any(|p| relative.starts_with(p))
    }
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub is_dir: bool,
    pub is_symlink: bool,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            is_dir: metadata.is_dir(),
            is_symlink: entry.path_is_symlink(),
        })
    }
}

/// Walk `root` and collect every non-excluded entry below it, directories
/// before their contents. The root itself is not returned.
pub fn walk_directory(root: &Path, excludes: &ExcludeSet) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let relative = e.path().strip_prefix(root).unwrap_or(e.path());
            !excludes.is_excluded(relative)
        });

    for entry in walker {
        let entry = entry?;
        entries.push(FileInfo::from_entry(&entry, root)?);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn default_excludes() -> ExcludeSet {
        ExcludeSet::new(&[
            "*.log",
            "*.tmp",
            "__pycache__",
            ".git",
            "logs",
            "models/cv",
        ])
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &ExcludeSet::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let entries = walk_directory(temp_dir.path(), &ExcludeSet::default())?;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.is_dir).count(), 1);

        Ok(())
    }

    #[test]
    fn test_exclude_patterns() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("models/cv"))?;
        fs::create_dir_all(root.join("models/nlp"))?;
        fs::create_dir_all(root.join("__pycache__"))?;
        fs::write(root.join("models/cv/weights.bin"), b"huge")?;
        fs::write(root.join("models/nlp/vocab.txt"), b"keep")?;
        fs::write(root.join("__pycache__/a.pyc"), b"cache")?;
        fs::write(root.join("app.log"), b"log")?;
        fs::write(root.join("main.py"), b"keep")?;

        let entries = walk_directory(root, &default_excludes())?;
        let mut relative: Vec<String> = entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().to_string())
            .collect();
        relative.sort();

        assert_eq!(
            relative,
            vec!["main.py", "models", "models/nlp", "models/nlp/vocab.txt"]
        );

        Ok(())
    }

    #[test]
    fn test_name_pattern_is_exact() {
        let excludes = ExcludeSet::new(&["logs"]);
        assert!(excludes.is_excluded(Path::new("var/logs")));
        assert!(!excludes.is_excluded(Path::new("var/logship")));
    }
}
