//! Container init: the first code that runs inside a new container.
//!
//! The launcher starts the runtime binary's hidden `init` command as the
//! container process. It waits on the hand-off channel until the launcher
//! has attached limits and networking, then switches into the container
//! root and replaces itself with the user command.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Search path used when the container environment has no `PATH`.
#[cfg(target_os = "linux")]
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runs the container init. Only returns on failure.
///
/// # Errors
///
/// Returns a process error if no command arrives or it cannot be
/// executed, and the underlying error if the root switch fails.
#[cfg(target_os = "linux")]
pub fn run_init() -> Result<std::convert::Infallible> {
    use std::ffi::OsString;
    use std::os::unix::process::CommandExt;

    use corral_common::constants::INIT_HOSTNAME_ENV;
    use corral_core::filesystem::{mount, pivot_root};
    use corral_core::handoff::InitReceiver;

    use crate::split_command;

    let command = split_command(&InitReceiver::inherited()?.recv()?);
    let Some((program, args)) = command.split_first() else {
        return Err(CorralError::process(
            "container init received no command; the launcher exited before release",
        ));
    };
    tracing::debug!(program = %program, "container init released");

    let rootfs = std::env::current_dir().map_err(|e| CorralError::Io {
        path: PathBuf::from("."),
        source: e,
    })?;
    mount::make_mounts_private()?;
    pivot_root::pivot_root(&rootfs)?;
    mount::mount_proc()?;
    mount::mount_dev_tmpfs()?;
    if let Some(hostname) = std::env::var_os(INIT_HOSTNAME_ENV) {
        corral_core::namespace::set_hostname(&hostname.to_string_lossy())?;
    }

    let path = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(DEFAULT_PATH));
    let resolved = resolve_program(program, &path)?;
    let err = std::process::Command::new(&resolved)
        .arg0(program)
        .args(args)
        .env_remove(INIT_HOSTNAME_ENV)
        .exec();
    Err(CorralError::process(format!(
        "exec {} in container: {err}",
        resolved.display()
    )))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; containers require Linux.
#[cfg(not(target_os = "linux"))]
pub fn run_init() -> Result<std::convert::Infallible> {
    Err(CorralError::process("Linux required for container init"))
}

/// Resolves `program` against `path` unless it already names a file.
///
/// # Errors
///
/// Returns a process error if no executable matches.
pub fn resolve_program(program: &str, path: &std::ffi::OsStr) -> Result<PathBuf> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    which::which_in(program, Some(path), Path::new("/"))
        .map_err(|e| CorralError::process(format!("'{program}' not found in container PATH: {e}")))
}
