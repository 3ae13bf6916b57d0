//! Background container supervision.
//!
//! Each CLI invocation is short-lived, but a background container needs
//! a parent that outlives it to reap it and clean up. `run` therefore
//! forks a monitor process into its own session. The monitor launches
//! the container (so it is the container's parent), reports the id back
//! over a pipe, and stays until the container exits.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::Context;
use corral_common::config::RuntimeConfig;
use corral_common::types::ContainerId;
use corral_runtime::{RunOptions, RunOutcome, Runtime};

/// Log file of background monitors, under the state root.
const MONITOR_LOG: &str = "monitor.log";

/// Starts `options` under a detached monitor process and returns the new
/// container's id once it is running.
///
/// # Errors
///
/// Returns an error if the monitor cannot be forked or the launch fails.
#[allow(unsafe_code)]
pub fn run_in_background(config: RuntimeConfig, options: RunOptions) -> anyhow::Result<ContainerId> {
    use nix::fcntl::OFlag;
    use nix::unistd::{ForkResult, fork, pipe2};

    let (read, write) = pipe2(OFlag::O_CLOEXEC).context("create monitor pipe")?;
    // SAFETY: the CLI is single-threaded at this point, so the child only
    // inherits this thread and may run arbitrary code.
    match unsafe { fork() }.context("fork monitor")? {
        ForkResult::Parent { .. } => {
            drop(write);
            let mut reply = String::new();
            let _ = File::from(read)
                .read_to_string(&mut reply)
                .context("read monitor reply")?;
            parse_reply(&reply)
        }
        ForkResult::Child => {
            drop(read);
            let code = monitor(config, options, File::from(write));
            std::process::exit(code);
        }
    }
}

fn monitor(config: RuntimeConfig, options: RunOptions, mut reply: File) -> i32 {
    if let Err(e) = nix::unistd::setsid() {
        tracing::warn!(error = %e, "monitor stays in the caller's session");
    }
    redirect(libc::STDIN_FILENO, Path::new("/dev/null"), false);

    let outcome = Runtime::new(config.clone()).and_then(|runtime| runtime.run(options));
    let monitor = match outcome {
        Ok(RunOutcome::Detached { id, monitor }) => {
            let _ = writeln!(reply, "ok {id}");
            monitor
        }
        Ok(RunOutcome::Exited { id, .. }) => {
            let _ = writeln!(reply, "ok {id}");
            return 0;
        }
        Err(e) => {
            let _ = writeln!(reply, "err {e}");
            return 1;
        }
    };
    drop(reply);

    // The caller's terminal goes away; later output goes to the monitor log.
    let log = config.root().join(MONITOR_LOG);
    redirect(libc::STDOUT_FILENO, Path::new("/dev/null"), false);
    redirect(libc::STDERR_FILENO, &log, true);

    match monitor.wait() {
        Ok(code) => {
            tracing::info!(code, "background container finished");
            0
        }
        Err(e) => {
            tracing::warn!(error = %e, "background container lost");
            1
        }
    }
}

/// Points descriptor `fd` at `path`; falls back to `/dev/null`.
#[allow(unsafe_code)]
fn redirect(fd: i32, path: &Path, append: bool) {
    let file = OpenOptions::new()
        .read(!append)
        .write(true)
        .append(append)
        .create(append)
        .open(path)
        .or_else(|_| OpenOptions::new().read(true).write(true).open("/dev/null"));
    match file {
        Ok(file) => {
            // SAFETY: dup2 of a descriptor we own onto a standard stream.
            if unsafe { libc::dup2(file.as_raw_fd(), fd) } < 0 {
                tracing::warn!(fd, "standard stream not redirected");
            }
        }
        Err(e) => tracing::warn!(fd, error = %e, "standard stream not redirected"),
    }
}

fn parse_reply(reply: &str) -> anyhow::Result<ContainerId> {
    let reply = reply.trim_end();
    if let Some(id) = reply.strip_prefix("ok ") {
        return Ok(ContainerId::new(id));
    }
    if let Some(message) = reply.strip_prefix("err ") {
        anyhow::bail!("{message}");
    }
    anyhow::bail!("background monitor exited before reporting the container")
}
