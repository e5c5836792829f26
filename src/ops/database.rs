//! Persistent list of known image paths.
//!
//! Plain text, one absolute path per line, kept sorted and de-duplicated.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct ImageDatabase {
    path: PathBuf,
}

impl ImageDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in sorted order. A missing file is an empty database.
    pub fn load(&self) -> Result<Vec<PathBuf>> {
        Ok(self.load_set()?.into_iter().collect())
    }

    fn load_set(&self) -> Result<BTreeSet<PathBuf>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read database: {}", self.path.display()));
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    fn save(&self, entries: &BTreeSet<PathBuf>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut content = String::new();
        for entry in entries {
            content.push_str(&entry.to_string_lossy());
            content.push('\n');
        }
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write database: {}", self.path.display()))
    }

    /// Add `paths`; returns how many were not already present.
    pub fn merge<I>(&self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut entries = self.load_set()?;
        let before = entries.len();
        entries.extend(paths.into_iter().map(|p| absolute(&p)));
        let added = entries.len() - before;
        if added > 0 {
            self.save(&entries)?;
        }
        tracing::debug!("database merge added {} entr(y/ies)", added);
        Ok(added)
    }

    /// Drop entries whose file no longer exists; returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let entries = self.load_set()?;
        let before = entries.len();
        let kept: BTreeSet<PathBuf> = entries.into_iter().filter(|p| p.is_file()).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save(&kept)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to clear database: {}", self.path.display())),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_database_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = ImageDatabase::new(dir.path().join("nested/db.txt"));
        assert!(db.load().unwrap().is_empty());
        db.clear().unwrap();
    }

    #[test]
    fn test_merge_sorts_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let db = ImageDatabase::new(dir.path().join("nested/db.txt"));

        let added = db
            .merge(vec![PathBuf::from("/b.iso"), PathBuf::from("/a.iso"), PathBuf::from("/b.iso")])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(db.merge(vec![PathBuf::from("/a.iso")]).unwrap(), 0);
        assert_eq!(db.load().unwrap(), vec![PathBuf::from("/a.iso"), PathBuf::from("/b.iso")]);

        let content = fs::read_to_string(db.path()).unwrap();
        assert_eq!(content, "/a.iso\n/b.iso\n");
    }

    #[test]
    fn test_prune_and_clear() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present.iso");
        fs::write(&present, b"x").unwrap();
        let db = ImageDatabase::new(dir.path().join("db.txt"));
        db.merge(vec![present.clone(), dir.path().join("gone.iso")]).unwrap();

        assert_eq!(db.prune().unwrap(), 1);
        assert_eq!(db.load().unwrap(), vec![present]);

        db.clear().unwrap();
        assert!(db.load().unwrap().is_empty());
    }
}
