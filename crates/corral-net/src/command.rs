//! Host command execution.
//!
//! Network plumbing goes through `ip`, `iptables` and `nsenter`. Drivers
//! issue those through [`CommandRunner`] so tests can record the exact
//! sequence instead of touching the host.

use std::process::Command;

use corral_common::error::{CorralError, Result};

/// Runs a host program to completion.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the program cannot be found or exits
    /// unsuccessfully.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// [`CommandRunner`] that executes on the host, resolving programs
/// through `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let path = which::which(program)
            .map_err(|e| CorralError::resource(format!("{program} not available: {e}")))?;
        tracing::debug!(program, args = ?args, "running host command");
        let output = Command::new(&path)
            .args(args)
            .output()
            .map_err(|e| CorralError::Io { path, source: e })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CorralError::resource(format!(
                "{program} {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
