//! Domain operations run by the batch engine.
//!
//! Each module exposes plain functions that take a [`crate::engine::BatchRunner`]
//! plus a selection and return the batch report. The per-item work lives in
//! closures; the engine never sees domain types beyond [`crate::engine::BatchItem`].

pub mod convert;
pub mod database;
pub mod mount;
pub mod rename;
pub mod search;
pub mod selection;
pub mod transfer;

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Staging name for output that is still being written: `<path>.part`.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Remove a staging file, ignoring one that was never created.
fn remove_part(part: &Path) {
    match fs::remove_file(part) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            tracing::warn!("could not remove {}: {}", part.display(), e);
        }
        _ => {}
    }
}

/// Case-insensitive file-extension filter.
#[derive(Debug, Clone)]
pub struct ExtensionMatcher {
    set: GlobSet,
}

impl ExtensionMatcher {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for ext in extensions {
            let ext = ext.as_ref().trim().trim_start_matches('.');
            if ext.is_empty() {
                continue;
            }
            builder.add(GlobBuilder::new(&format!("*.{ext}")).case_insensitive(true).build()?);
        }
        Ok(Self { set: builder.build()? })
    }

    /// Matches on the file name only.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name().is_some_and(|name| self.set.is_match(name))
    }
}
