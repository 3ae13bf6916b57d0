//! Creation and supervision of isolated container processes.
//!
//! [`create_isolated_process`] clones a child into fresh namespaces with
//! its working directory at the container root filesystem, then execs
//! the runtime's own `init` entry point there. The child receives the
//! hand-off receiver at a fixed descriptor and does nothing further until
//! the launcher sends it the user command.

use std::fs::File;
use std::path::PathBuf;

use corral_common::error::{CorralError, Result};

use crate::handoff::InitReceiver;
use crate::namespace::NamespaceSet;

/// Size of the stack handed to `clone(2)`. The child only runs until
/// `execve`, so this is generous.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit code of a child that failed before `execve`.
const SETUP_FAILED: isize = 127;

/// Where the container's standard streams go.
#[derive(Debug)]
pub enum Stdio {
    /// Share the launcher's terminal.
    Inherit,
    /// Send stdout and stderr to this file; stdin is left as inherited.
    LogFile(File),
}

/// Everything needed to create an isolated process.
#[derive(Debug)]
pub struct IsolatedProcessSpec {
    /// Namespaces to create.
    pub namespaces: NamespaceSet,
    /// Container root filesystem, used as the child's working directory.
    pub rootfs: PathBuf,
    /// Program to exec in the child.
    pub program: PathBuf,
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Complete environment of the child.
    pub env: Vec<(String, String)>,
    /// Standard stream routing.
    pub stdio: Stdio,
}

/// Handle to a process created by [`create_isolated_process`].
#[derive(Debug)]
pub struct IsolatedProcess {
    pid: u32,
}

impl IsolatedProcess {
    /// Host pid of the process.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Blocks until the process exits and reaps it.
    ///
    /// Returns the exit code, or `128 + signal` if it was killed.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails for a reason other than
    /// interruption.
    pub fn wait(&self) -> Result<i32> {
        wait_pid(self.pid)
    }
}

/// Clones a child process into `spec.namespaces` and execs
/// `spec.program` inside it.
///
/// The receiver is installed at the init pipe descriptor in the child.
/// The returned process has not run any user code yet.
///
/// # Errors
///
/// Returns a validation error if an argument or environment entry holds
/// a NUL byte, and a process error if `clone(2)` fails.
#[cfg(target_os = "linux")]
pub fn create_isolated_process(
    spec: IsolatedProcessSpec,
    receiver: InitReceiver,
) -> Result<IsolatedProcess> {
    use std::ffi::CString;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;

    use corral_common::constants::INIT_PIPE_FD;

    let cstring = |s: &[u8]| {
        CString::new(s).map_err(|_| CorralError::validation("argument contains a NUL byte"))
    };

    let program = cstring(spec.program.as_os_str().as_bytes())?;
    let rootfs = cstring(spec.rootfs.as_os_str().as_bytes())?;
    let mut argv = vec![program.clone()];
    for arg in &spec.args {
        argv.push(cstring(arg.as_bytes())?);
    }
    let envp = spec
        .env
        .iter()
        .map(|(k, v)| cstring(format!("{k}={v}").as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    let pipe_fd = receiver.as_raw_fd();
    let log_fd = match &spec.stdio {
        Stdio::Inherit => None,
        Stdio::LogFile(file) => Some(file.as_raw_fd()),
    };

    // Runs in the child between clone and execve. Only async-signal-safe
    // calls on data prepared above.
    let child = move || -> isize {
        // SAFETY: plain descriptor-table and cwd syscalls on descriptors
        // this process owns.
        unsafe {
            if let Some(fd) = log_fd {
                if libc::dup2(fd, libc::STDOUT_FILENO) < 0 || libc::dup2(fd, libc::STDERR_FILENO) < 0 {
                    return SETUP_FAILED;
                }
            }
            if pipe_fd == INIT_PIPE_FD {
                if libc::fcntl(pipe_fd, libc::F_SETFD, 0) < 0 {
                    return SETUP_FAILED;
                }
            } else if libc::dup2(pipe_fd, INIT_PIPE_FD) < 0 {
                return SETUP_FAILED;
            }
            if libc::chdir(rootfs.as_ptr()) < 0 {
                return SETUP_FAILED;
            }
        }
        let _ = nix::unistd::execve(&program, &argv, &envp);
        SETUP_FAILED
    };

    let mut stack = vec![0_u8; CHILD_STACK_SIZE];
    let flags = spec.namespaces.clone_flags();
    // SAFETY: the child gets its own copy of the address space (no
    // CLONE_VM) and only runs the callback above before exec or exit.
    let pid = unsafe {
        nix::sched::clone(Box::new(child), &mut stack, flags, Some(libc::SIGCHLD))
    }
    .map_err(|e| CorralError::process(format!("clone isolated process: {e}")))?;

    // The parent's copies are no longer needed.
    drop(receiver);
    drop(spec.stdio);

    let pid = u32::try_from(pid.as_raw())
        .map_err(|_| CorralError::process(format!("clone returned invalid pid {pid}")))?;
    tracing::info!(pid, rootfs = %spec.rootfs.display(), "isolated process created");
    Ok(IsolatedProcess { pid })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_isolated_process(
    _spec: IsolatedProcessSpec,
    _receiver: InitReceiver,
) -> Result<IsolatedProcess> {
    Err(crate::linux_required())
}

fn to_pid(pid: u32) -> Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .map(nix::unistd::Pid::from_raw)
        .map_err(|_| CorralError::validation(format!("pid {pid} out of range")))
}

/// Blocks until the child `pid` exits and reaps it.
///
/// # Errors
///
/// Returns an error if `pid` is not a child of the caller.
pub fn wait_pid(pid: u32) -> Result<i32> {
    use nix::errno::Errno;
    use nix::sys::wait::{WaitStatus, waitpid};

    let target = to_pid(pid)?;
    loop {
        match waitpid(target, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                tracing::debug!(pid, code, "process exited");
                return Ok(code);
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::debug!(pid, signal = %signal, "process killed by signal");
                return Ok(128 + signal as i32);
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(CorralError::process(format!("wait for pid {pid}: {e}"))),
        }
    }
}

/// Returns whether a process with host pid `pid` exists.
///
/// A process owned by another user still counts as alive.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;

    let Ok(target) = to_pid(pid) else {
        return false;
    };
    if target.as_raw() <= 0 {
        return false;
    }
    match nix::sys::signal::kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Sends `signal` to `pid`.
///
/// Returns `false` if the process no longer exists.
///
/// # Errors
///
/// Returns an error if delivery fails for any other reason.
pub fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<bool> {
    use nix::errno::Errno;

    let target = to_pid(pid)?;
    if target.as_raw() <= 0 {
        return Err(CorralError::validation(format!("refusing to signal pid {pid}")));
    }
    match nix::sys::signal::kill(target, signal) {
        Ok(()) => {
            tracing::debug!(pid, signal = %signal, "signal sent");
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(CorralError::process(format!("signal {signal} to pid {pid}: {e}"))),
    }
}
