//! Copy, move and delete.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use thiserror::Error;

use super::{part_path, remove_part};
use crate::engine::{BatchItem, BatchReport, BatchRunner, Cancelled, ItemContext, ItemOutcome};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    fn label(self) -> &'static str {
        match self {
            TransferMode::Copy => "Copying",
            TransferMode::Move => "Moving",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            TransferMode::Copy => "copied",
            TransferMode::Move => "moved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl BatchItem for TransferItem {
    fn describe(&self) -> String {
        format!("{} -> {}", self.source.display(), self.destination.display())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub mode: TransferMode,
    pub overwrite: bool,
    pub buffer_size: usize,
}

/// Pair every source with every destination directory, destination-major.
pub fn plan_transfers(sources: &[PathBuf], destination_dirs: &[PathBuf]) -> Vec<TransferItem> {
    destination_dirs
        .iter()
        .flat_map(|dir| {
            sources.iter().filter_map(move |source| {
                source.file_name().map(|name| TransferItem {
                    source: source.clone(),
                    destination: dir.join(name),
                })
            })
        })
        .collect()
}

/// Copy or move the planned items. Items sharing a destination run in one task.
pub fn transfer(
    runner: &BatchRunner,
    sources: &[PathBuf],
    destination_dirs: &[PathBuf],
    options: TransferOptions,
) -> Result<BatchReport> {
    if destination_dirs.is_empty() {
        bail!("No destination directory given");
    }
    if options.mode == TransferMode::Move && destination_dirs.len() > 1 {
        bail!("Move takes exactly one destination directory; copy to the others first");
    }

    let items = plan_transfers(sources, destination_dirs);
    let total_bytes: u64 = items
        .iter()
        .filter_map(|item| fs::metadata(&item.source).ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum();

    let report = runner.run_with_destinations(
        options.mode.label(),
        items,
        total_bytes,
        |item| Some(item.destination.clone()),
        move |item, ctx| transfer_one(item, &options, ctx),
    )?;
    Ok(report)
}

fn transfer_one(item: &TransferItem, options: &TransferOptions, ctx: &ItemContext<'_>) -> ItemOutcome {
    let TransferItem { source, destination } = item;

    if !source.is_file() {
        return ItemOutcome::Failed(format!("{}: not a file", source.display()));
    }
    if destination.exists() {
        if same_file(source, destination) {
            return ItemOutcome::Skipped(format!("{}: source and destination are the same", source.display()));
        }
        if !options.overwrite {
            return ItemOutcome::Skipped(format!("{}: already exists", destination.display()));
        }
    }

    if let Some(parent) = destination.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return ItemOutcome::Failed(format!("{}: {}", parent.display(), e));
        }
    }

    let result = match options.mode {
        TransferMode::Copy => copy_file(source, destination, options.buffer_size, ctx),
        TransferMode::Move => move_file(source, destination, options.buffer_size, ctx),
    };

    match result {
        Ok(bytes) => {
            tracing::debug!("{} {} ({} bytes)", options.mode.verb(), item.describe(), bytes);
            ItemOutcome::Completed(format!("{} {}", options.mode.verb(), item.describe()))
        }
        Err(TransferError::Cancelled(_)) => ItemOutcome::Cancelled(format!("{}: cancelled", item.describe())),
        Err(e) => ItemOutcome::Failed(e.to_string()),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Stream `source` into `destination` in `buffer_size` blocks.
///
/// Data is staged in `<destination>.part` and renamed over `destination` only
/// once the copy finished, so an existing destination survives a failed or
/// cancelled copy. The token is checked before every block.
pub fn copy_file(
    source: &Path,
    destination: &Path,
    buffer_size: usize,
    ctx: &ItemContext<'_>,
) -> Result<u64, TransferError> {
    let part = part_path(destination);
    let result = stream_copy(source, &part, buffer_size.max(1), ctx)
        .and_then(|copied| fs::rename(&part, destination).map(|_| copied).map_err(io_error(destination)));
    if result.is_err() {
        remove_part(&part);
    }
    result
}

fn stream_copy(source: &Path, part: &Path, buffer_size: usize, ctx: &ItemContext<'_>) -> Result<u64, TransferError> {
    let mut reader = File::open(source).map_err(io_error(source))?;
    let mut writer = File::create(part).map_err(io_error(part))?;
    let mut buffer = vec![0u8; buffer_size];
    let mut copied = 0u64;

    loop {
        ctx.check()?;
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(source)(e)),
        };
        writer.write_all(&buffer[..read]).map_err(io_error(part))?;
        copied += read as u64;
        ctx.add_bytes(read as u64);
    }

    writer.flush().map_err(io_error(part))?;
    if let Ok(meta) = fs::metadata(source) {
        // Permissions are best effort.
        let _ = fs::set_permissions(part, meta.permissions());
    }
    Ok(copied)
}

/// Rename when possible, otherwise copy and remove the source.
pub fn move_file(
    source: &Path,
    destination: &Path,
    buffer_size: usize,
    ctx: &ItemContext<'_>,
) -> Result<u64, TransferError> {
    ctx.check()?;
    let size = fs::metadata(source).map_err(io_error(source))?.len();

    match fs::rename(source, destination) {
        Ok(()) => {
            ctx.add_bytes(size);
            Ok(size)
        }
        Err(e) => {
            tracing::debug!("rename {} failed ({}), copying instead", source.display(), e);
            let copied = copy_file(source, destination, buffer_size, ctx)?;
            fs::remove_file(source).map_err(io_error(source))?;
            Ok(copied)
        }
    }
}

/// Delete files, or whole directories when `recursive` is set.
pub fn delete(runner: &BatchRunner, paths: Vec<PathBuf>, recursive: bool) -> Result<BatchReport> {
    let report = runner.run("Deleting", paths, 0, move |path, ctx| {
        if ctx.is_cancelled() {
            return ItemOutcome::Cancelled(format!("{}: cancelled", path.display()));
        }

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => return ItemOutcome::Failed(format!("{}: {}", path.display(), e)),
        };

        let result = if meta.is_dir() {
            if !recursive {
                return ItemOutcome::Failed(format!("{}: is a directory (use --recursive)", path.display()));
            }
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => ItemOutcome::Completed(format!("deleted {}", path.display())),
            Err(e) => ItemOutcome::Failed(format!("{}: {}", path.display(), e)),
        }
    })?;
    Ok(report)
}
