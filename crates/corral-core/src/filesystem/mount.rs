//! Mount utilities for container filesystem setup.
//!
//! Handles mount propagation, the `/proc` and `/dev` pseudo-filesystems
//! inside the container, and host bind mounts for volumes.

use std::path::Path;

use corral_common::error::{CorralError, Result};

#[cfg(target_os = "linux")]
fn mount_error(what: &str, target: &Path, e: nix::errno::Errno) -> CorralError {
    CorralError::process(format!("{what} on {}: {e}", target.display()))
}

/// Marks every mount in the current namespace private, recursively, so
/// nothing the container mounts propagates back to the host.
///
/// # Errors
///
/// Returns an error if the remount fails.
#[cfg(target_os = "linux")]
pub fn make_mounts_private() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let root = Path::new("/");
    mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| mount_error("make private", root, e))?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_mounts_private() -> Result<()> {
    Err(crate::linux_required())
}

/// Mounts a fresh `proc` at `/proc` of the current root.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_proc() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/proc");
    ensure_dir(target)?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| mount_error("mount proc", target, e))?;
    tracing::debug!("mounted /proc");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_proc() -> Result<()> {
    Err(crate::linux_required())
}

/// Mounts a `tmpfs` at `/dev` of the current root.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_dev_tmpfs() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let target = Path::new("/dev");
    ensure_dir(target)?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| mount_error("mount tmpfs", target, e))?;
    tracing::debug!("mounted /dev");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_dev_tmpfs() -> Result<()> {
    Err(crate::linux_required())
}

/// Bind-mounts `source` onto `target`, creating both directories if
/// needed.
///
/// # Errors
///
/// Returns an error if directory creation or the `mount(2)` call fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    ensure_dir(source)?;
    ensure_dir(target)?;
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| mount_error("bind mount", target, e))?;
    tracing::debug!(source = %source.display(), target = %target.display(), "bind mount created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path) -> Result<()> {
    Err(crate::linux_required())
}

/// Lazily detaches whatever is mounted at `target`.
///
/// Returns `false` if nothing was mounted there (or the path is gone),
/// so callers can unmount unconditionally during cleanup.
///
/// # Errors
///
/// Returns an error for failures other than "not mounted" or "missing".
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<bool> {
    use nix::errno::Errno;
    use nix::mount::{MntFlags, umount2};

    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "unmounted");
            Ok(true)
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(false),
        Err(e) => Err(mount_error("unmount", target, e)),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<bool> {
    Err(crate::linux_required())
}

/// Creates `dir` and its parents if missing.
///
/// # Errors
///
/// Returns an I/O error if creation fails.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CorralError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}
