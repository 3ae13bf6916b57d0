//! `OverlayFS` workspaces for container root filesystems.
//!
//! An image directory is stacked read-only beneath a per-container
//! writable upper layer, so containers started from the same image never
//! see each other's writes.

use std::path::{Path, PathBuf};

use corral_common::error::Result;

/// Directory layout of one container's overlay workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Lays out `upper`, `work` and `merged` under `workspace` on top of
    /// a single lower directory.
    #[must_use]
    pub fn under(workspace: &Path, lower: impl Into<PathBuf>) -> Self {
        Self {
            lower_dirs: vec![lower.into()],
            upper_dir: workspace.join("upper"),
            work_dir: workspace.join("work"),
            merged_dir: workspace.join("merged"),
        }
    }

    /// The `mount(2)` data string for this configuration.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist.
///
/// # Errors
///
/// Returns an error if directory creation or the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use corral_common::error::CorralError;
    use nix::mount::{MsFlags, mount};

    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        super::mount::ensure_dir(dir)?;
    }
    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CorralError::resource(format!("overlay mount failed: {e}")))?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; `OverlayFS` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(_config: &OverlayConfig) -> Result<()> {
    Err(crate::linux_required())
}
