//! Cgroup resource management.
//!
//! Every container gets its own hierarchy instance named after its id, so
//! concurrently running containers never share or overwrite each other's
//! limits. Both the unified hierarchy (cgroups v2) and the legacy
//! per-subsystem hierarchies (cgroups v1) are supported; the layout is
//! detected from the cgroup root.

pub mod cpu;
pub mod cpuset;
pub mod memory;

use std::path::{Path, PathBuf};

use corral_common::constants::CGROUP_PARENT;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ResourceConfig};

/// File listing the member processes of a cgroup.
const PROCS_FILE: &str = "cgroup.procs";

/// Which cgroup hierarchy layout the host exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupLayout {
    /// cgroups v2: a single tree, controllers enabled per directory.
    Unified,
    /// cgroups v1: one mounted tree per subsystem.
    Legacy,
}

impl CgroupLayout {
    /// Detects the layout mounted at `root`.
    #[must_use]
    pub fn detect(root: &Path) -> Self {
        if root.join("cgroup.controllers").exists() {
            Self::Unified
        } else {
            Self::Legacy
        }
    }
}

/// A resource-limit subsystem the runtime knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Memory limit.
    Memory,
    /// CPU share weight.
    CpuShare,
    /// CPU-set mask.
    CpuSet,
}

impl Subsystem {
    /// Every supported subsystem, in configuration order.
    pub const ALL: [Self; 3] = [Self::Memory, Self::CpuShare, Self::CpuSet];

    /// Kernel controller name.
    #[must_use]
    pub const fn controller(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::CpuShare => "cpu",
            Self::CpuSet => "cpuset",
        }
    }

    /// Returns whether `res` constrains this subsystem.
    #[must_use]
    pub const fn is_configured(self, res: &ResourceConfig) -> bool {
        match self {
            Self::Memory => res.memory_bytes.is_some(),
            Self::CpuShare => res.cpu_shares.is_some(),
            Self::CpuSet => res.cpuset.is_some(),
        }
    }

    fn write_limit(self, dir: &Path, layout: CgroupLayout, res: &ResourceConfig) -> Result<()> {
        match self {
            Self::Memory => res
                .memory_bytes
                .map_or(Ok(()), |bytes| memory::set_memory_limit(dir, layout, bytes)),
            Self::CpuShare => res
                .cpu_shares
                .map_or(Ok(()), |shares| cpu::set_cpu_shares(dir, layout, shares)),
            Self::CpuSet => res
                .cpuset
                .as_deref()
                .map_or(Ok(()), |mask| cpuset::set_cpus(dir, layout, mask)),
        }
    }
}

/// Handle to the cgroup hierarchy instances of one container.
///
/// The manager is stateless apart from its paths: which instances exist
/// is read back from the filesystem, so a later process (for example
/// `rm`) can destroy what an earlier `run` created.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    root: PathBuf,
    name: String,
    layout: CgroupLayout,
}

impl CgroupManager {
    /// Creates a manager for the container `id` under the cgroup mount at
    /// `root`. Nothing is created until [`CgroupManager::set`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, id: &ContainerId) -> Self {
        let root = root.into();
        let layout = CgroupLayout::detect(&root);
        Self {
            root,
            name: id.as_str().to_owned(),
            layout,
        }
    }

    /// Returns the detected layout.
    #[must_use]
    pub const fn layout(&self) -> CgroupLayout {
        self.layout
    }

    /// Directory of this container's instance for `subsystem`.
    #[must_use]
    pub fn path_for(&self, subsystem: Subsystem) -> PathBuf {
        let base = match self.layout {
            CgroupLayout::Unified => self.root.clone(),
            CgroupLayout::Legacy => self.root.join(subsystem.controller()),
        };
        base.join(CGROUP_PARENT).join(&self.name)
    }

    /// Instance directories that currently exist, without duplicates.
    #[must_use]
    pub fn instances(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for subsystem in Subsystem::ALL {
            let path = self.path_for(subsystem);
            if path.is_dir() && !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// Creates an instance per constrained subsystem and writes its limit.
    ///
    /// A failure on one subsystem does not stop the others from being
    /// attempted; all failures are reported together.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Resource`] naming every subsystem that could
    /// not be created or configured.
    pub fn set(&self, res: &ResourceConfig) -> Result<()> {
        if self.layout == CgroupLayout::Unified && !res.is_unconstrained() {
            self.enable_controllers(res);
        }
        let mut failures = Vec::new();
        for subsystem in Subsystem::ALL {
            if !subsystem.is_configured(res) {
                continue;
            }
            let dir = self.path_for(subsystem);
            let outcome = create_dir(&dir).and_then(|()| subsystem.write_limit(&dir, self.layout, res));
            if let Err(e) = outcome {
                tracing::warn!(subsystem = subsystem.controller(), error = %e, "cgroup subsystem not configured");
                failures.push(format!("{}: {e}", subsystem.controller()));
            }
        }
        if failures.is_empty() {
            tracing::info!(cgroup = %self.name, "cgroup limits set");
            Ok(())
        } else {
            Err(CorralError::resource(format!(
                "cgroup {}: {}",
                self.name,
                failures.join("; ")
            )))
        }
    }

    /// Adds a process to every instance created by [`CgroupManager::set`].
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Resource`] naming every instance the pid
    /// could not be written to.
    pub fn apply(&self, pid: u32) -> Result<()> {
        let mut failures = Vec::new();
        for dir in self.instances() {
            let procs = dir.join(PROCS_FILE);
            if let Err(e) = std::fs::write(&procs, pid.to_string()) {
                failures.push(format!("{}: {e}", procs.display()));
            } else {
                tracing::debug!(pid, path = %procs.display(), "added process to cgroup");
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CorralError::resource(format!(
                "attach pid {pid} to cgroup {}: {}",
                self.name,
                failures.join("; ")
            )))
        }
    }

    /// Removes every instance of this container's hierarchy.
    ///
    /// Absent instances are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Resource`] if an existing instance cannot be
    /// removed (for example while it still has member processes).
    pub fn destroy(&self) -> Result<()> {
        let instances = self.instances();
        if instances.is_empty() {
            tracing::debug!(cgroup = %self.name, "no cgroup instances to destroy");
            return Ok(());
        }
        let mut failures = Vec::new();
        for dir in instances {
            if let Err(e) = remove_instance(&dir) {
                failures.push(format!("{}: {e}", dir.display()));
            }
        }
        if failures.is_empty() {
            tracing::info!(cgroup = %self.name, "cgroup destroyed");
            Ok(())
        } else {
            Err(CorralError::resource(failures.join("; ")))
        }
    }

    /// Enables the controllers `res` needs on the path from the root to
    /// the container's parent. Failures only mean the later limit writes
    /// will fail, so they are logged.
    fn enable_controllers(&self, res: &ResourceConfig) {
        let wanted: Vec<String> = Subsystem::ALL
            .iter()
            .filter(|s| s.is_configured(res))
            .map(|s| format!("+{}", s.controller()))
            .collect();
        let parent = self.root.join(CGROUP_PARENT);
        if let Err(e) = create_dir(&parent) {
            tracing::debug!(error = %e, "cgroup parent not created");
            return;
        }
        for dir in [&self.root, &parent] {
            let control = dir.join("cgroup.subtree_control");
            if let Err(e) = std::fs::write(&control, wanted.join(" ")) {
                tracing::debug!(path = %control.display(), error = %e, "controllers not enabled");
            }
        }
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| CorralError::Io {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// A real cgroup directory is removed with `rmdir(2)` even though it
/// appears to contain files; anything else falls back to a recursive
/// removal.
fn remove_instance(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => std::fs::remove_dir_all(dir),
        Err(e) => Err(e),
    }
}

/// Reads the member pids of a cgroup directory.
///
/// # Errors
///
/// Returns an error if `cgroup.procs` cannot be read.
pub fn member_pids(dir: &Path) -> Result<Vec<u32>> {
    let procs = dir.join(PROCS_FILE);
    let content = std::fs::read_to_string(&procs).map_err(|e| CorralError::Io {
        path: procs,
        source: e,
    })?;
    Ok(content
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect())
}
