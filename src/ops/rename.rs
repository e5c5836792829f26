//! Bulk case renaming.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::engine::{BatchReport, BatchRunner, ItemOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CaseMode {
    Lower,
    Upper,
    /// Capitalise the start of every word in the stem; the extension is lowercased
    Title,
}

/// Apply `mode` to a file name.
pub fn apply_case(name: &str, mode: CaseMode) -> String {
    match mode {
        CaseMode::Lower => name.to_lowercase(),
        CaseMode::Upper => name.to_uppercase(),
        CaseMode::Title => match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}.{}", title_case(stem), ext.to_lowercase()),
            _ => title_case(name),
        },
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// The path `path` would be renamed to.
pub fn rename_target(path: &Path, mode: CaseMode) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    Some(path.with_file_name(apply_case(name, mode)))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Rename every path. Paths that would end up with the same name run in one task.
pub fn rename_all(runner: &BatchRunner, paths: Vec<PathBuf>, mode: CaseMode) -> Result<BatchReport> {
    let report = runner.run_with_destinations(
        "Renaming",
        paths,
        0,
        move |path| rename_target(path, mode),
        move |path, ctx| {
            if ctx.is_cancelled() {
                return ItemOutcome::Cancelled(format!("{}: cancelled", path.display()));
            }
            if fs::symlink_metadata(path).is_err() {
                return ItemOutcome::Failed(format!("{}: not found", path.display()));
            }
            let Some(target) = rename_target(path, mode) else {
                return ItemOutcome::Failed(format!("{}: file name is not valid UTF-8", path.display()));
            };
            if target == *path {
                return ItemOutcome::Skipped(format!("{}: unchanged", path.display()));
            }
            // A case-insensitive filesystem reports the target as existing; that is the same file.
            if target.exists() && !same_file(path, &target) {
                return ItemOutcome::Skipped(format!("{}: {} already exists", path.display(), target.display()));
            }

            match fs::rename(path, &target) {
                Ok(()) => ItemOutcome::Completed(format!("{} -> {}", path.display(), target.display())),
                Err(e) => ItemOutcome::Failed(format!("{}: {}", path.display(), e)),
            }
        },
    )?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BatchSettings, CancellationToken, ProgressOptions};
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner() -> BatchRunner {
        BatchRunner::new(
            BatchSettings {
                max_threads: 4,
                max_chunk_size: 5,
                progress: ProgressOptions {
                    interval: Duration::from_millis(10),
                    visible: false,
                },
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_apply_case() {
        assert_eq!(apply_case("My Game.ISO", CaseMode::Lower), "my game.iso");
        assert_eq!(apply_case("My Game.iso", CaseMode::Upper), "MY GAME.ISO");
        assert_eq!(apply_case("the LAST_of us-part ii.ISO", CaseMode::Title), "The Last_Of Us-Part Ii.iso");
        assert_eq!(apply_case("don't stop.bin", CaseMode::Title), "Don't Stop.bin");
        assert_eq!(apply_case(".hidden", CaseMode::Title), ".Hidden");
        assert_eq!(apply_case("README", CaseMode::Title), "Readme");
    }

    #[test]
    fn test_rename_target() {
        assert_eq!(
            rename_target(Path::new("/isos/Disc ONE.Iso"), CaseMode::Lower),
            Some(PathBuf::from("/isos/disc one.iso"))
        );
    }

    #[test]
    fn test_rename_batch() {
        let dir = TempDir::new().unwrap();
        let upper = dir.path().join("GAME.ISO");
        let plain = dir.path().join("other.iso");
        fs::write(&upper, b"a").unwrap();
        fs::write(&plain, b"b").unwrap();

        let report = rename_all(
            &runner(),
            vec![upper.clone(), plain.clone(), dir.path().join("missing.iso")],
            CaseMode::Lower,
        )
        .unwrap();

        assert_eq!(report.outcomes.completed.len(), 1);
        assert_eq!(report.outcomes.skipped.len(), 1);
        assert_eq!(report.outcomes.failed.len(), 1);
        assert!(dir.path().join("game.iso").exists());
        assert!(plain.exists());
    }

    #[test]
    fn test_rename_collision_is_skipped() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("Disc.iso");
        let second = dir.path().join("DISC.iso");
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();
        if fs::read(&first).unwrap() != b"first" {
            // Case-insensitive filesystem; the two names are one file.
            return;
        }

        let report = rename_all(&runner(), vec![first, second], CaseMode::Upper).unwrap();
        assert_eq!(report.outcomes.completed.len(), 1);
        assert_eq!(report.outcomes.skipped.len(), 1);
        assert_eq!(fs::read(dir.path().join("DISC.ISO")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("DISC.iso")).unwrap(), b"second");
    }
}
