//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, this actually changes the root mount, so the old
//! host root can be detached and is unreachable from the container.

use std::path::Path;

use corral_common::error::Result;

/// Name of the directory the old root is parked in during the switch.
pub const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the root filesystem of the calling mount namespace.
///
/// `new_root` is bind-mounted onto itself first (`pivot_root` requires a
/// mount point), the old root is moved under [`PUT_OLD`], the working
/// directory is reset to `/`, and the old root is detached and removed.
///
/// # Errors
///
/// Returns an error if any step of the switch fails.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use corral_common::error::CorralError;
    use nix::mount::{MntFlags, MsFlags, mount, umount2};

    let fail = |step: &str, e: nix::errno::Errno| {
        CorralError::process(format!("pivot_root {} ({step}): {e}", new_root.display()))
    };

    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| fail("self bind", e))?;

    let put_old = new_root.join(PUT_OLD);
    super::mount::ensure_dir(&put_old)?;
    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| fail("pivot", e))?;
    nix::unistd::chdir("/").map_err(|e| fail("chdir", e))?;

    let old = Path::new("/").join(PUT_OLD);
    umount2(&old, MntFlags::MNT_DETACH).map_err(|e| fail("detach old root", e))?;
    std::fs::remove_dir(&old).map_err(|e| CorralError::Io {
        path: old.clone(),
        source: e,
    })?;

    tracing::info!(new_root = %new_root.display(), "root filesystem switched");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; `pivot_root` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(crate::linux_required())
}
