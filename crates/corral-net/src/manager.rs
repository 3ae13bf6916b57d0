//! Network lifecycle: create, list, remove, connect, disconnect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, PortMapping};

use crate::bridge::BridgeDriver;
use crate::driver::NetworkDriver;
use crate::network::{Endpoint, NetworkConfig};
use crate::store::NetworkStore;

/// Front door for everything network related.
#[derive(Clone)]
pub struct NetworkManager {
    store: NetworkStore,
    drivers: HashMap<String, Arc<dyn NetworkDriver>>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("store", &self.store)
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NetworkManager {
    /// Manager over `networks_dir` with the host `bridge` driver.
    #[must_use]
    pub fn new(networks_dir: impl Into<PathBuf>) -> Self {
        Self::with_drivers(networks_dir, vec![Arc::new(BridgeDriver::default())])
    }

    /// Manager over `networks_dir` with the given drivers.
    #[must_use]
    pub fn with_drivers(
        networks_dir: impl Into<PathBuf>,
        drivers: Vec<Arc<dyn NetworkDriver>>,
    ) -> Self {
        Self {
            store: NetworkStore::new(networks_dir),
            drivers: drivers
                .into_iter()
                .map(|d| (d.name().to_owned(), d))
                .collect(),
        }
    }

    fn driver(&self, name: &str) -> Result<&Arc<dyn NetworkDriver>> {
        self.drivers
            .get(name)
            .ok_or_else(|| CorralError::validation(format!("unknown network driver '{name}'")))
    }

    /// Creates network `name` on `subnet` with `driver`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, duplicate names or
    /// overlapping subnets, and a resource error if the devices cannot
    /// be created. Nothing persists on failure.
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<NetworkConfig> {
        let config = NetworkConfig::new(name, driver, subnet)?;
        let driver = Arc::clone(self.driver(driver)?);
        if let Some(other) = self
            .store
            .list()?
            .into_iter()
            .find(|n| n.subnet.overlaps(config.subnet))
        {
            return Err(CorralError::validation(format!(
                "subnet {} overlaps network '{}' ({})",
                config.subnet, other.name, other.subnet
            )));
        }

        self.store.claim(name)?;
        if let Err(e) = driver.create(&config) {
            let _ = self.store.remove(name);
            return Err(e);
        }
        let persisted = self
            .store
            .ipam(name)
            .initialize(config.subnet, config.gateway)
            .and_then(|()| self.store.save(&config));
        if let Err(e) = persisted {
            if let Err(cleanup) = driver.delete(&config) {
                tracing::warn!(network = name, error = %cleanup, "bridge not removed after failed create");
            }
            let _ = self.store.remove(name);
            return Err(e);
        }
        tracing::info!(network = name, subnet = %config.subnet, gateway = %config.gateway, "network created");
        Ok(config)
    }

    /// Every network, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list_networks(&self) -> Result<Vec<NetworkConfig>> {
        self.store.list()
    }

    /// Loads network `name`.
    ///
    /// # Errors
    ///
    /// Returns not-found if it does not exist.
    pub fn get(&self, name: &str) -> Result<NetworkConfig> {
        self.store.get(name)
    }

    /// Attaches container `id` (running as host `pid`) to network `name`.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown networks, a resource error on pool
    /// exhaustion or wiring failure. The address is released on failure.
    pub fn connect(
        &self,
        name: &str,
        id: &ContainerId,
        pid: u32,
        ports: &[PortMapping],
    ) -> Result<Endpoint> {
        let config = self.store.get(name)?;
        let driver = self.driver(&config.driver)?;
        let ipam = self.store.ipam(name);
        let ip = ipam.allocate(id.as_str())?;
        let endpoint = Endpoint::new(id, ip, ports);
        if let Err(e) = driver.connect(&config, &endpoint, pid) {
            if let Err(release) = ipam.release(ip, id.as_str()) {
                tracing::warn!(network = name, ip = %ip, error = %release, "address not released");
            }
            return Err(e);
        }
        Ok(endpoint)
    }

    /// Detaches `endpoint` from network `name` and returns its address.
    /// Never fails; problems are logged.
    pub fn disconnect(&self, name: &str, endpoint: &Endpoint) {
        let config = match self.store.get(name) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(network = name, error = %e, "disconnect skipped");
                return;
            }
        };
        match self.driver(&config.driver) {
            Ok(driver) => {
                if let Err(e) = driver.disconnect(&config, endpoint) {
                    tracing::warn!(network = name, container = %endpoint.container_id, error = %e, "endpoint not fully removed");
                }
            }
            Err(e) => tracing::warn!(network = name, error = %e, "disconnect skipped"),
        }
        if let Err(e) = self
            .store
            .ipam(name)
            .release(endpoint.ip, endpoint.container_id.as_str())
        {
            tracing::warn!(network = name, ip = %endpoint.ip, error = %e, "address not released");
        }
    }

    /// Removes network `name`.
    ///
    /// `referencing` lists the containers whose records still name this
    /// network; any entry blocks removal.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown networks, a validation error while
    /// containers reference it, and a resource error if the bridge cannot
    /// be removed.
    pub fn delete_network(&self, name: &str, referencing: &[ContainerId]) -> Result<()> {
        let config = self.store.get(name)?;
        if !referencing.is_empty() {
            let ids: Vec<&str> = referencing.iter().map(ContainerId::short).collect();
            return Err(CorralError::validation(format!(
                "network '{name}' is in use by {}",
                ids.join(", ")
            )));
        }
        if let Ok(pool) = self.store.ipam(name).snapshot() {
            if !pool.allocated.is_empty() {
                tracing::warn!(network = name, stale = pool.allocated.len(), "dropping allocations of vanished containers");
            }
        }
        self.driver(&config.driver)?.delete(&config)?;
        self.store.remove(name)?;
        tracing::info!(network = name, "network removed");
        Ok(())
    }
}
