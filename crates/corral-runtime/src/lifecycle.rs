//! Container lifecycle controller.
//!
//! [`Runtime`] ties the launcher, cgroups, networking, the rootfs provider
//! and the state store together. A container moves through
//! `RUNNING -> STOPPED -> removed`; `CREATED` only exists inside
//! [`Runtime::run`] and is never persisted.
//!
//! `run` acquires resources in a fixed order and releases the container
//! through its hand-off gate only after limits and networking are in
//! place. Anything acquired before a failure is released in reverse.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{
    ContainerId, ContainerStatus, PortMapping, ResourceConfig, VolumeSpec, validate_cpuset,
};
use corral_core::cgroup::CgroupManager;
use corral_core::process::{is_alive, send_signal};
use corral_image::{ImageArtifact, OverlayRootfs, RootfsProvider};
use corral_net::{Endpoint, NetworkConfig, NetworkManager};
use nix::sys::signal::Signal;

use crate::launcher::{ContainerProcess, LaunchRequest, NamespaceLauncher, ProcessLauncher};
use crate::monitor::{ExitCleanup, ExitMonitor};
use crate::record::{ContainerRecord, RECORD_SCHEMA_VERSION};
use crate::state::StateStore;
use crate::{exec, join_command, logs};

/// Everything `run` needs to know about a new container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Image the root filesystem is built from.
    pub image: String,
    /// Command to run; the first entry is the program.
    pub command: Vec<String>,
    /// Optional unique name.
    pub name: Option<String>,
    /// Run in the foreground on the caller's terminal.
    pub tty: bool,
    /// Limits to apply.
    pub resources: ResourceConfig,
    /// Host directory to bind into the container.
    pub volume: Option<VolumeSpec>,
    /// Extra environment entries.
    pub env: Vec<(String, String)>,
    /// Network to attach to.
    pub network: Option<String>,
    /// Ports to publish; requires a network.
    pub ports: Vec<PortMapping>,
}

/// Result of a successful `run`.
#[derive(Debug)]
pub enum RunOutcome {
    /// Foreground container ran to completion and was cleaned up.
    Exited {
        /// Container id.
        id: ContainerId,
        /// Exit code of the container command.
        code: i32,
    },
    /// Background container is running; `monitor` cleans up after it.
    Detached {
        /// Container id.
        id: ContainerId,
        /// Watcher of the container process.
        monitor: ExitMonitor,
    },
}

impl RunOutcome {
    /// Id of the container that was run.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        match self {
            Self::Exited { id, .. } | Self::Detached { id, .. } => id,
        }
    }
}

/// Resources taken by an in-flight `run`, released in reverse on failure.
#[derive(Default)]
struct Acquired {
    state_dir: bool,
    rootfs: bool,
    process: Option<Box<dyn ContainerProcess>>,
    cgroup: Option<CgroupManager>,
    endpoint: Option<(String, Endpoint)>,
}

/// The container lifecycle controller.
#[derive(Clone)]
pub struct Runtime {
    config: RuntimeConfig,
    store: StateStore,
    launcher: Arc<dyn ProcessLauncher>,
    rootfs: Arc<dyn RootfsProvider>,
    networks: NetworkManager,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.config.root())
            .field("networks", &self.networks)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Runtime with the namespace launcher, `OverlayFS` rootfs and bridge
    /// networking, all rooted at `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime binary path cannot be determined.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let launcher = Arc::new(NamespaceLauncher::current_exe()?);
        let rootfs = Arc::new(OverlayRootfs::new(config.images_dir(), config.overlay_dir()));
        let networks = NetworkManager::new(config.networks_dir());
        Ok(Self::with_parts(config, launcher, rootfs, networks))
    }

    /// Runtime built from explicit collaborators.
    #[must_use]
    pub fn with_parts(
        config: RuntimeConfig,
        launcher: Arc<dyn ProcessLauncher>,
        rootfs: Arc<dyn RootfsProvider>,
        networks: NetworkManager,
    ) -> Self {
        Self {
            store: StateStore::new(&config),
            config,
            launcher,
            rootfs,
            networks,
        }
    }

    /// The state store.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs a new container.
    ///
    /// Foreground runs block until the container exits and clean up
    /// before returning. Background runs return as soon as the command
    /// is released, with a monitor that cleans up on exit.
    ///
    /// # Errors
    ///
    /// Returns a validation or not-found error before anything is
    /// touched, or the error of the failing step after releasing what
    /// was acquired.
    pub fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        self.validate(&options)?;
        let id = ContainerId::generate();
        tracing::info!(id = %id, image = %options.image, "creating container");

        let mut acquired = Acquired::default();
        if let Err(e) = self.start(&id, &options, &mut acquired) {
            tracing::warn!(id = %id, error = %e, "run failed; releasing resources");
            self.unwind(&id, options.volume.as_ref(), acquired);
            return Err(e);
        }
        let Some(mut process) = acquired.process.take() else {
            return Err(CorralError::process("container process missing after launch"));
        };

        let cleanup = self.exit_cleanup(&id);
        if options.tty {
            let code = process.wait();
            cleanup.run();
            Ok(RunOutcome::Exited { id, code: code? })
        } else {
            let monitor = ExitMonitor::spawn(process, cleanup)?;
            Ok(RunOutcome::Detached { id, monitor })
        }
    }

    fn validate(&self, options: &RunOptions) -> Result<()> {
        if options.command.is_empty() {
            return Err(CorralError::validation("missing container command"));
        }
        if let Some(name) = &options.name {
            self.store.ensure_name_available(name)?;
        }
        for (key, _) in &options.env {
            if key.is_empty() || key.contains(['=', '\0']) {
                return Err(CorralError::validation(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
        }
        if let Some(mask) = &options.resources.cpuset {
            validate_cpuset(mask)?;
        }
        match &options.network {
            Some(network) => {
                let _ = self.networks.get(network)?;
            }
            None if !options.ports.is_empty() => {
                return Err(CorralError::validation(
                    "publishing ports requires a network",
                ));
            }
            None => {}
        }
        Ok(())
    }

    fn start(&self, id: &ContainerId, options: &RunOptions, acquired: &mut Acquired) -> Result<()> {
        let _ = self.store.prepare(id)?;
        acquired.state_dir = true;

        let rootfs = self
            .rootfs
            .mount(id, &options.image, options.volume.as_ref())?;
        acquired.rootfs = true;

        let launched = self.launcher.launch(&LaunchRequest {
            id: id.clone(),
            rootfs,
            tty: options.tty,
            env: options.env.clone(),
            network: options.network.is_some(),
            log_path: self.store.log_path(id),
        })?;
        let pid = launched.process.pid();
        acquired.process = Some(launched.process);

        let cgroup = CgroupManager::new(&self.config.cgroup_root, id);
        acquired.cgroup = Some(cgroup.clone());
        cgroup.set(&options.resources)?;
        cgroup.apply(pid)?;

        let mut ip_address = None;
        if let Some(network) = &options.network {
            let endpoint = self.networks.connect(network, id, pid, &options.ports)?;
            ip_address = Some(endpoint.ip);
            acquired.endpoint = Some((network.clone(), endpoint));
        }

        let record = ContainerRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            id: id.clone(),
            name: options.name.clone(),
            pid: Some(pid),
            command: options.command.clone(),
            created_at: Utc::now(),
            status: ContainerStatus::Running,
            image: options.image.clone(),
            volume: options.volume.clone(),
            network: options.network.clone(),
            ip_address,
            port_mappings: options.ports.clone(),
            resources: options.resources.clone(),
        };
        self.store.record(&record)?;

        launched.gate.send(&join_command(&options.command))?;
        tracing::info!(id = %id, pid, ip = ?ip_address, "container running");
        Ok(())
    }

    fn unwind(&self, id: &ContainerId, volume: Option<&VolumeSpec>, acquired: Acquired) {
        if let Some(mut process) = acquired.process {
            process.kill();
            if let Err(e) = process.wait() {
                tracing::warn!(id = %id, error = %e, "half-launched process not reaped");
            }
        }
        if let Some((network, endpoint)) = &acquired.endpoint {
            self.networks.disconnect(network, endpoint);
        }
        if let Some(cgroup) = &acquired.cgroup {
            if let Err(e) = cgroup.destroy() {
                tracing::warn!(id = %id, error = %e, "cgroup not removed after failed run");
            }
        }
        if acquired.rootfs {
            if let Err(e) = self.rootfs.unmount(id, volume) {
                tracing::warn!(id = %id, error = %e, "rootfs not removed after failed run");
            }
        }
        if acquired.state_dir {
            if let Err(e) = self.store.delete(id) {
                tracing::warn!(id = %id, error = %e, "state not removed after failed run");
            }
        }
    }

    fn exit_cleanup(&self, id: &ContainerId) -> ExitCleanup {
        let runtime = self.clone();
        let id = id.clone();
        ExitCleanup::new(move || runtime.cleanup_after_exit(&id))
    }

    /// Cleanup once the container process is gone.
    ///
    /// A container stopped by the user keeps its record, workspace and
    /// address until `rm`; only its empty cgroup goes. A container that
    /// exited on its own is removed completely. A record that is already
    /// gone was removed while the process was still alive, so whatever
    /// that removal could not release is retried here.
    fn cleanup_after_exit(&self, id: &ContainerId) {
        match self.store.get(id) {
            Ok(record) if record.status == ContainerStatus::Stopped => {
                self.destroy_cgroup(id);
                tracing::info!(id = %id, "stopped container exited; kept until removed");
            }
            Ok(record) => {
                if let Err(e) = self.teardown(&record) {
                    tracing::warn!(id = %id, error = %e, "container state not removed");
                }
            }
            Err(e) if e.is_not_found() => {
                self.destroy_cgroup(id);
                if let Err(e) = self.rootfs.unmount(id, None) {
                    tracing::warn!(id = %id, error = %e, "rootfs not removed");
                }
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "exit cleanup skipped"),
        }
    }

    /// Releases everything a container holds, then deletes its record.
    /// Only the record deletion can fail the call.
    fn teardown(&self, record: &ContainerRecord) -> Result<()> {
        if let Some((network, endpoint)) = record.endpoint() {
            self.networks.disconnect(network, &endpoint);
        }
        self.destroy_cgroup(&record.id);
        if let Err(e) = self.rootfs.unmount(&record.id, record.volume.as_ref()) {
            tracing::warn!(id = %record.id, error = %e, "rootfs not removed");
        }
        let _ = self.store.delete(&record.id)?;
        tracing::info!(id = %record.id, name = record.display_name(), "container removed");
        Ok(())
    }

    fn destroy_cgroup(&self, id: &ContainerId) {
        if let Err(e) = CgroupManager::new(&self.config.cgroup_root, id).destroy() {
            tracing::warn!(id = %id, error = %e, "cgroup not removed");
        }
    }

    /// Stops a container by sending its process SIGTERM.
    ///
    /// Does not wait for the process to exit: the record says STOPPED as
    /// soon as the signal is sent.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown containers and a process error if
    /// the signal cannot be delivered.
    pub fn stop(&self, reference: &str) -> Result<ContainerRecord> {
        let id = self.store.resolve(reference)?;
        let mut record = self.store.get_reconciled(&id)?;
        let pid = match record.pid {
            Some(pid) if record.status == ContainerStatus::Running => pid,
            _ => {
                record.mark_stopped();
                ignore_removed(self.store.update(&record))?;
                tracing::info!(id = %id, "container already stopped");
                return Ok(record);
            }
        };

        // Persist first so the exit monitor sees a user stop, not an exit.
        let running = record.clone();
        record.mark_stopped();
        if let Err(e) = self.store.update(&record) {
            if e.is_not_found() {
                tracing::info!(id = %id, "container exited and was removed meanwhile");
                return Ok(record);
            }
            return Err(e);
        }
        match send_signal(pid, Signal::SIGTERM) {
            Ok(true) => tracing::info!(id = %id, pid, "container signalled to stop"),
            Ok(false) => tracing::info!(id = %id, pid, "container process already gone"),
            Err(e) => {
                ignore_removed(self.store.update(&running))?;
                return Err(e);
            }
        }
        Ok(record)
    }

    /// Removes a stopped container, or a running one when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown containers, a validation error for
    /// running containers without `force` or records with an unknown
    /// status, and an error if the record cannot be deleted.
    pub fn remove(&self, reference: &str, force: bool) -> Result<()> {
        let id = self.store.resolve(reference)?;
        let record = self.store.get_reconciled(&id)?;
        match record.status {
            ContainerStatus::Stopped => self.teardown(&record),
            ContainerStatus::Running if !force => Err(CorralError::validation(format!(
                "container {} is running; stop it first or force removal",
                record.display_name()
            ))),
            ContainerStatus::Running => {
                tracing::info!(id = %id, "force removing running container");
                ignore_removed(self.stop(id.as_str()).map(|_| ()))?;
                ignore_removed(self.remove(id.as_str(), force))
            }
            ContainerStatus::Unknown => Err(CorralError::validation(format!(
                "container {} has an invalid status; refusing to remove it",
                record.display_name()
            ))),
        }
    }

    /// Runs `command` inside a running container and returns its exit
    /// code. Output goes to the caller's streams.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty commands or containers that
    /// are not running.
    pub fn exec(&self, reference: &str, command: &[String]) -> Result<i32> {
        if command.is_empty() {
            return Err(CorralError::validation("missing exec command"));
        }
        let id = self.store.resolve(reference)?;
        let record = self.store.get_reconciled(&id)?;
        let pid = match record.pid {
            Some(pid) if record.is_running() => pid,
            _ => {
                return Err(CorralError::validation(format!(
                    "container {} is not running",
                    record.display_name()
                )));
            }
        };
        exec::spawn_reentrant(pid, id.as_str(), command)
    }

    /// Snapshots a container's filesystem as image `image_name`.
    ///
    /// # Errors
    ///
    /// Returns not-found if the container or its workspace is gone.
    pub fn commit(&self, reference: &str, image_name: &str) -> Result<ImageArtifact> {
        let id = self.store.resolve(reference)?;
        let artifact = self.rootfs.commit(&id, image_name)?;
        tracing::info!(id = %id, image = image_name, digest = %artifact.digest, "container committed");
        Ok(artifact)
    }

    /// Captured output of a container.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown containers.
    pub fn logs(&self, reference: &str) -> Result<String> {
        let id = self.store.resolve(reference)?;
        logs::read_logs(&self.store.log_path(&id))
    }

    /// Path of a container's captured output.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown containers.
    pub fn log_path(&self, reference: &str) -> Result<PathBuf> {
        Ok(self.store.log_path(&self.store.resolve(reference)?))
    }

    /// All containers, oldest first, with the status observed now rather
    /// than the one stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut records = self.store.list()?;
        for record in &mut records {
            if record.status == ContainerStatus::Running && !record.pid.is_some_and(is_alive) {
                record.mark_stopped();
            }
        }
        Ok(records)
    }

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// See [`NetworkManager::create_network`].
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<NetworkConfig> {
        self.networks.create_network(driver, subnet, name)
    }

    /// Every network, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_networks(&self) -> Result<Vec<NetworkConfig>> {
        self.networks.list_networks()
    }

    /// Removes a network no container record refers to.
    ///
    /// # Errors
    ///
    /// See [`NetworkManager::delete_network`].
    pub fn remove_network(&self, name: &str) -> Result<()> {
        let referencing: Vec<ContainerId> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| r.network.as_deref() == Some(name))
            .map(|r| r.id)
            .collect();
        self.networks.delete_network(name, &referencing)
    }
}

/// Treats "the record is already gone" as success: the exit monitor may
/// remove a container between any two steps of a user operation.
fn ignore_removed(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
