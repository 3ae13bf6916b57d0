//! Linux namespace management for container isolation.
//!
//! A container gets fresh PID, mount, UTS and IPC namespaces, plus a
//! network namespace when it is attached to a network. Joining the
//! namespaces of a running container goes through `setns(2)` on the
//! descriptors under `/proc/<pid>/ns`.

use corral_common::error::Result;

/// Which namespaces a new container process is created in.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Isolate the PID namespace.
    pub pid: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate the IPC namespace.
    pub ipc: bool,
    /// Isolate the network stack.
    pub network: bool,
}

impl NamespaceSet {
    /// The set used for containers: everything isolated, with the network
    /// namespace only when the container joins a network.
    #[must_use]
    pub const fn container(network: bool) -> Self {
        Self {
            pid: true,
            mount: true,
            uts: true,
            ipc: true,
            network,
        }
    }

    /// Translates the set into `clone(2)` flags.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn clone_flags(&self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        let mut flags = CloneFlags::empty();
        flags.set(CloneFlags::CLONE_NEWPID, self.pid);
        flags.set(CloneFlags::CLONE_NEWNS, self.mount);
        flags.set(CloneFlags::CLONE_NEWUTS, self.uts);
        flags.set(CloneFlags::CLONE_NEWIPC, self.ipc);
        flags.set(CloneFlags::CLONE_NEWNET, self.network);
        flags
    }
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::container(false)
    }
}

/// Namespace kinds joined by [`join_namespaces`], in joining order.
///
/// The mount namespace comes last: once it is entered the host's
/// `/proc/<pid>/ns` paths may no longer resolve.
pub const JOIN_ORDER: [&str; 5] = ["ipc", "uts", "net", "pid", "mnt"];

/// Moves the calling process into the namespaces of `pid`.
///
/// Namespaces the target shares with the caller are skipped. Joining the
/// PID namespace only affects children forked afterwards, so callers must
/// spawn the command they want to run inside the container.
///
/// # Errors
///
/// Returns an error if a namespace descriptor cannot be opened or
/// `setns(2)` fails.
#[cfg(target_os = "linux")]
pub fn join_namespaces(pid: u32) -> Result<()> {
    use std::fs::File;
    use std::path::PathBuf;

    use corral_common::error::CorralError;
    use nix::sched::{CloneFlags, setns};

    // All descriptors are opened first, while the host /proc is visible.
    let mut handles = Vec::with_capacity(JOIN_ORDER.len());
    for kind in JOIN_ORDER {
        let target = PathBuf::from(format!("/proc/{pid}/ns/{kind}"));
        let own = PathBuf::from(format!("/proc/self/ns/{kind}"));
        if let (Ok(a), Ok(b)) = (std::fs::read_link(&target), std::fs::read_link(&own)) {
            if a == b {
                tracing::debug!(pid, kind, "namespace already shared, skipping");
                continue;
            }
        }
        let file = File::open(&target).map_err(|e| CorralError::Io {
            path: target,
            source: e,
        })?;
        handles.push((kind, file));
    }

    for (kind, file) in handles {
        let flag = match kind {
            "ipc" => CloneFlags::CLONE_NEWIPC,
            "uts" => CloneFlags::CLONE_NEWUTS,
            "net" => CloneFlags::CLONE_NEWNET,
            "pid" => CloneFlags::CLONE_NEWPID,
            _ => CloneFlags::CLONE_NEWNS,
        };
        setns(&file, flag)
            .map_err(|e| CorralError::process(format!("setns({kind}) into pid {pid}: {e}")))?;
        tracing::debug!(pid, kind, "joined namespace");
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn join_namespaces(_pid: u32) -> Result<()> {
    Err(crate::linux_required())
}

/// Sets the hostname inside the current UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
#[cfg(target_os = "linux")]
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| {
        corral_common::error::CorralError::process(format!("sethostname({hostname}): {e}"))
    })?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; UTS namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_hostname(_hostname: &str) -> Result<()> {
    Err(crate::linux_required())
}
