//! Loop-mounting images under a base directory.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::engine::{BatchReport, BatchRunner, ItemOutcome};

const MOUNT_DIR_PREFIX: &str = "iso_";

#[derive(Debug, Error)]
pub enum MountError {
    #[error("{0} not found in PATH")]
    MissingTool(&'static str),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },
}

/// The system side of mounting, kept behind a trait so batches can be tested without root.
pub trait MountBackend: Send + Sync {
    fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), MountError>;
    fn unmount(&self, mount_point: &Path) -> Result<(), MountError>;
    fn is_mounted(&self, mount_point: &Path) -> bool;
}

/// Uses the `mount` and `umount` binaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

impl SystemMounter {
    fn run(tool: &'static str, args: &[&OsStr]) -> Result<(), MountError> {
        let exe = which::which(tool).map_err(|_| MountError::MissingTool(tool))?;
        tracing::debug!("running {} {:?}", exe.display(), args);

        let output = Command::new(exe)
            .args(args)
            .output()
            .map_err(|source| MountError::Spawn { tool, source })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MountError::Failed {
                tool,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl MountBackend for SystemMounter {
    fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), MountError> {
        Self::run(
            "mount",
            &[
                OsStr::new("-o"),
                OsStr::new("loop,ro"),
                image.as_os_str(),
                mount_point.as_os_str(),
            ],
        )
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        Self::run("umount", &[mount_point.as_os_str()])
    }

    fn is_mounted(&self, mount_point: &Path) -> bool {
        let Ok(content) = fs::read_to_string("/proc/self/mounts") else {
            return false;
        };
        let target = mount_point
            .canonicalize()
            .unwrap_or_else(|_| mount_point.to_path_buf());
        mounted_targets(&content).iter().any(|mounted| *mounted == target)
    }
}

/// Mount targets listed in a `/proc/self/mounts` style table.
pub fn mounted_targets(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .collect()
}

// The kernel writes space, tab, newline and backslash as octal escapes.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = i + 3 < bytes.len() && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b));
        if bytes[i] == b'\\' && octal {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `base_dir/iso_<stem>`
pub fn mount_point_for(base_dir: &Path, image: &Path) -> Option<PathBuf> {
    let stem = image.file_stem()?.to_string_lossy();
    Some(base_dir.join(format!("{MOUNT_DIR_PREFIX}{stem}")))
}

/// Every `iso_*` directory directly under `base_dir`, sorted.
pub fn mount_dirs(base_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(base_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(MOUNT_DIR_PREFIX))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    dirs
}

/// Resolve an unmount argument: a directory is taken as the mount point,
/// anything else as an image whose mount point lives under `base_dir`.
pub fn resolve_unmount_target(base_dir: &Path, target: &Path) -> Option<PathBuf> {
    if target.is_dir() {
        Some(target.to_path_buf())
    } else {
        mount_point_for(base_dir, target)
    }
}

/// Mount every image under `base_dir`. Images sharing a mount point run in one task.
pub fn mount_images(
    runner: &BatchRunner,
    images: Vec<PathBuf>,
    base_dir: &Path,
    backend: Arc<dyn MountBackend>,
) -> Result<BatchReport> {
    let key_base = base_dir.to_path_buf();
    let base_dir = base_dir.to_path_buf();

    let report = runner.run_with_destinations(
        "Mounting",
        images,
        0,
        move |image| mount_point_for(&key_base, image),
        move |image, ctx| {
            if ctx.is_cancelled() {
                return ItemOutcome::Cancelled(format!("{}: cancelled", image.display()));
            }
            if !image.is_file() {
                return ItemOutcome::Failed(format!("{}: not a file", image.display()));
            }
            let Some(mount_point) = mount_point_for(&base_dir, image) else {
                return ItemOutcome::Failed(format!("{}: no file name", image.display()));
            };
            if backend.is_mounted(&mount_point) {
                return ItemOutcome::Skipped(format!("{}: already mounted", mount_point.display()));
            }

            let created = !mount_point.exists();
            if let Err(e) = fs::create_dir_all(&mount_point) {
                return ItemOutcome::Failed(format!("{}: {}", mount_point.display(), e));
            }

            match backend.mount(image, &mount_point) {
                Ok(()) => ItemOutcome::Completed(format!("{} -> {}", image.display(), mount_point.display())),
                Err(e) => {
                    if created {
                        if let Err(rm) = fs::remove_dir(&mount_point) {
                            tracing::warn!("could not remove {}: {}", mount_point.display(), rm);
                        }
                    }
                    ItemOutcome::Failed(format!("{}: {}", image.display(), e))
                }
            }
        },
    )?;
    Ok(report)
}

/// Unmount each mount point and remove its directory.
pub fn unmount_targets(
    runner: &BatchRunner,
    mount_points: Vec<PathBuf>,
    backend: Arc<dyn MountBackend>,
) -> Result<BatchReport> {
    let report = runner.run_with_destinations(
        "Unmounting",
        mount_points,
        0,
        |mount_point| Some(mount_point.canonicalize().unwrap_or_else(|_| mount_point.clone())),
        move |mount_point, ctx| {
            if ctx.is_cancelled() {
                return ItemOutcome::Cancelled(format!("{}: cancelled", mount_point.display()));
            }
            if !backend.is_mounted(mount_point) {
                // Leftover empty directories from earlier runs go away too.
                if mount_point.is_dir() && fs::remove_dir(mount_point).is_ok() {
                    return ItemOutcome::Skipped(format!("{}: not mounted, removed empty directory", mount_point.display()));
                }
                return ItemOutcome::Skipped(format!("{}: not mounted", mount_point.display()));
            }

            match backend.unmount(mount_point) {
                Ok(()) => {
                    if let Err(e) = fs::remove_dir(mount_point) {
                        tracing::warn!("could not remove {}: {}", mount_point.display(), e);
                    }
                    ItemOutcome::Completed(format!("unmounted {}", mount_point.display()))
                }
                Err(e) => ItemOutcome::Failed(format!("{}: {}", mount_point.display(), e)),
            }
        },
    )?;
    Ok(report)
}
