//! Process launcher.
//!
//! A launch creates the container process in its namespaces but leaves it
//! blocked on the hand-off channel. The caller attaches cgroups and
//! networking, then releases it through [`LaunchedProcess::gate`].

use std::path::PathBuf;

use corral_common::constants::INIT_HOSTNAME_ENV;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;
use corral_core::handoff::{self, InitSender};
use corral_core::namespace::NamespaceSet;
use corral_core::process::{self, IsolatedProcess, IsolatedProcessSpec, Stdio};

use crate::logs;

/// Hidden subcommand the container process re-executes into.
pub const INIT_COMMAND: &str = "init";

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Container the process belongs to.
    pub id: ContainerId,
    /// Merged root filesystem.
    pub rootfs: PathBuf,
    /// Share the caller's terminal instead of capturing output.
    pub tty: bool,
    /// Extra environment entries, applied over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Give the process its own network namespace.
    pub network: bool,
    /// Where captured output goes when `tty` is false.
    pub log_path: PathBuf,
}

/// A launched container process.
pub trait ContainerProcess: Send {
    /// Host pid.
    fn pid(&self) -> u32;

    /// Blocks until the process exits; returns its exit code, or
    /// `128 + signal` when it was killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be waited for.
    fn wait(&mut self) -> Result<i32>;

    /// Kills the process without waiting for it. Used when a launch is
    /// rolled back before the process was released.
    fn kill(&mut self);
}

/// A process blocked on its hand-off gate.
pub struct LaunchedProcess {
    /// The process.
    pub process: Box<dyn ContainerProcess>,
    /// Releases the process by sending it the command to run.
    pub gate: InitSender,
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Creates blocked container processes.
pub trait ProcessLauncher: Send + Sync {
    /// Creates the process described by `request`.
    ///
    /// # Errors
    ///
    /// Returns a process error if the process cannot be created; nothing
    /// is left running in that case.
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess>;
}

/// Launcher that clones the runtime binary into fresh namespaces and runs
/// its `init` command there.
#[derive(Debug, Clone)]
pub struct NamespaceLauncher {
    program: PathBuf,
}

impl NamespaceLauncher {
    /// Launcher re-executing the current binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the path of the running executable is unknown.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| CorralError::Io {
            path: PathBuf::from("/proc/self/exe"),
            source: e,
        })?;
        Ok(Self { program })
    }

    /// Launcher re-executing `program`.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Environment handed to the container init: the caller's environment,
/// then the requested entries (later entries win), then the hostname
/// marker.
#[must_use]
pub fn init_environment(
    inherited: impl IntoIterator<Item = (String, String)>,
    request: &LaunchRequest,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = Vec::new();
    let entries = inherited
        .into_iter()
        .filter(|(k, _)| k != INIT_HOSTNAME_ENV)
        .chain(request.env.iter().cloned())
        .chain(std::iter::once((
            INIT_HOSTNAME_ENV.to_owned(),
            request.id.short().to_owned(),
        )));
    for (key, value) in entries {
        match env.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => env.push((key, value)),
        }
    }
    env
}

impl ProcessLauncher for NamespaceLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedProcess> {
        let stdio = if request.tty {
            Stdio::Inherit
        } else {
            Stdio::LogFile(logs::create_log(&request.log_path)?)
        };
        let (gate, receiver) = handoff::channel()?;
        let spec = IsolatedProcessSpec {
            namespaces: NamespaceSet::container(request.network),
            rootfs: request.rootfs.clone(),
            program: self.program.clone(),
            args: vec![INIT_COMMAND.to_owned()],
            env: init_environment(std::env::vars(), request),
            stdio,
        };
        let process = process::create_isolated_process(spec, receiver)?;
        tracing::info!(id = %request.id, pid = process.pid(), "container process created");
        Ok(LaunchedProcess {
            process: Box::new(NamespaceProcess { inner: process }),
            gate,
        })
    }
}

#[derive(Debug)]
struct NamespaceProcess {
    inner: IsolatedProcess,
}

impl ContainerProcess for NamespaceProcess {
    fn pid(&self) -> u32 {
        self.inner.pid()
    }

    fn wait(&mut self) -> Result<i32> {
        self.inner.wait()
    }

    fn kill(&mut self) {
        if let Err(e) = process::send_signal(self.inner.pid(), nix::sys::signal::Signal::SIGKILL) {
            tracing::warn!(pid = self.inner.pid(), error = %e, "kill failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(env: Vec<(String, String)>) -> LaunchRequest {
        LaunchRequest {
            id: ContainerId::new("0123456789abcdef0123456789abcdef"),
            rootfs: PathBuf::from("/tmp/rootfs"),
            tty: false,
            env,
            network: false,
            log_path: PathBuf::from("/tmp/container.log"),
        }
    }

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_owned(), v.to_owned())
    }

    #[test]
    fn requested_entries_override_inherited_ones() {
        let env = init_environment(
            vec![pair("PATH", "/usr/bin"), pair("HOME", "/root")],
            &request(vec![pair("HOME", "/home/app"), pair("MODE", "prod")]),
        );
        assert_eq!(
            env,
            vec![
                pair("PATH", "/usr/bin"),
                pair("HOME", "/home/app"),
                pair("MODE", "prod"),
                pair(INIT_HOSTNAME_ENV, "0123456789ab"),
            ]
        );
    }

    #[test]
    fn hostname_marker_cannot_be_overridden() {
        let env = init_environment(
            vec![pair(INIT_HOSTNAME_ENV, "host")],
            &request(vec![pair(INIT_HOSTNAME_ENV, "spoof")]),
        );
        let hostnames: Vec<_> = env.iter().filter(|(k, _)| k == INIT_HOSTNAME_ENV).collect();
        assert_eq!(hostnames, vec![&pair(INIT_HOSTNAME_ENV, "0123456789ab")]);
    }
}
