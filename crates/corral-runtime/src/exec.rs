//! Running commands inside an existing container.
//!
//! `exec` happens in two steps. The outer call looks up the container
//! and re-executes the runtime binary with [`EXEC_PID_ENV`] naming the
//! target pid. The re-entrant call sees the marker, joins the target's
//! namespaces while it is still single-threaded, and runs the command as
//! a child so the command lands in the container's PID namespace too.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use corral_common::constants::EXEC_PID_ENV;
use corral_common::error::{CorralError, Result};

/// Re-executes the runtime as `exec <reference> -- <command>` with the
/// marker variable set, sharing the caller's standard streams. Returns
/// the command's exit code.
///
/// # Errors
///
/// Returns an error if the command is empty or the runtime binary cannot
/// be started.
pub fn spawn_reentrant(pid: u32, reference: &str, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(CorralError::validation("exec command is empty"));
    }
    let exe = std::env::current_exe().map_err(|e| CorralError::Io {
        path: PathBuf::from("/proc/self/exe"),
        source: e,
    })?;
    tracing::info!(pid, container = reference, cmd = ?command, "exec into container");
    let status = Command::new(&exe)
        .arg("exec")
        .arg(reference)
        .arg("--")
        .args(command)
        .env(EXEC_PID_ENV, pid.to_string())
        .status()
        .map_err(|e| CorralError::Io {
            path: exe,
            source: e,
        })?;
    Ok(exit_code(status))
}

/// Joins the namespaces of `pid` and runs `command` there with the
/// target's environment. Returns the command's exit code.
///
/// Must be called before the process starts any thread: the kernel
/// refuses to move a multi-threaded process into a mount namespace.
///
/// # Errors
///
/// Returns an error if the target is gone, a namespace cannot be joined,
/// or the command cannot be started.
pub fn enter_and_run(pid: u32, command: &[String]) -> Result<i32> {
    let Some((program, args)) = command.split_first() else {
        return Err(CorralError::validation("exec command is empty"));
    };
    let environ_path = PathBuf::from(format!("/proc/{pid}/environ"));
    let environ = std::fs::read(&environ_path).map_err(|e| CorralError::Io {
        path: environ_path,
        source: e,
    })?;
    let env = parse_environ(&environ);

    corral_core::namespace::join_namespaces(pid)?;
    std::env::set_current_dir("/").map_err(|e| CorralError::Io {
        path: PathBuf::from("/"),
        source: e,
    })?;

    let status = Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .status()
        .map_err(|e| CorralError::process(format!("run '{program}' in container: {e}")))?;
    Ok(exit_code(status))
}

/// Reads the target pid from the marker variable, if this is the
/// re-entrant call.
#[must_use]
pub fn reentrant_pid() -> Option<u32> {
    std::env::var(EXEC_PID_ENV).ok()?.parse().ok()
}

/// Parses a NUL-separated `KEY=value` block as found in
/// `/proc/<pid>/environ`. Entries without `=` are skipped.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|b| *b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_block_is_split_into_pairs() {
        let env = parse_environ(b"PATH=/bin:/usr/bin\0EMPTY=\0A=b=c\0junk\0\0");
        assert_eq!(
            env,
            vec![
                ("PATH".to_owned(), "/bin:/usr/bin".to_owned()),
                ("EMPTY".to_owned(), String::new()),
                ("A".to_owned(), "b=c".to_owned()),
            ]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            spawn_reentrant(1, "c1", &[]),
            Err(CorralError::Validation { .. })
        ));
        assert!(matches!(
            enter_and_run(1, &[]),
            Err(CorralError::Validation { .. })
        ));
    }

    #[test]
    fn signal_deaths_map_above_128() {
        let status = Command::new("sh")
            .args(["-c", "kill -TERM $$"])
            .status()
            .expect("spawn");
        assert_eq!(exit_code(status), 128 + 15);
        let status = Command::new("sh").args(["-c", "exit 3"]).status().expect("spawn");
        assert_eq!(exit_code(status), 3);
    }
}
