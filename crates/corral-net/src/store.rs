//! Persistence of network configurations.
//!
//! Layout: `<networks>/<name>/config.json` plus the allocator files
//! managed by [`crate::ipam`].

use std::path::PathBuf;

use corral_common::constants::CONFIG_FILE;
use corral_common::error::{CorralError, Result};
use corral_common::persist;

use crate::ipam::Ipam;
use crate::network::NetworkConfig;

/// Directory-backed network store.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    root: PathBuf,
}

impl NetworkStore {
    /// Store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of network `name`.
    #[must_use]
    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Allocator of network `name`.
    #[must_use]
    pub fn ipam(&self, name: &str) -> Ipam {
        Ipam::new(self.dir(name))
    }

    /// Claims the directory for a new network.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a network with that name exists.
    pub fn claim(&self, name: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| CorralError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        let dir = self.dir(name);
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                CorralError::validation(format!("network '{name}' already exists")),
            ),
            Err(e) => Err(CorralError::Io {
                path: dir,
                source: e,
            }),
        }
    }

    /// Writes `config` into its (claimed) directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save(&self, config: &NetworkConfig) -> Result<()> {
        persist::write_json(&self.dir(&config.name).join(CONFIG_FILE), config)
    }

    /// Loads network `name`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config exists but cannot be read.
    pub fn load(&self, name: &str) -> Result<Option<NetworkConfig>> {
        persist::read_json(&self.dir(name).join(CONFIG_FILE))
    }

    /// Loads network `name`.
    ///
    /// # Errors
    ///
    /// Returns not-found if it does not exist.
    pub fn get(&self, name: &str) -> Result<NetworkConfig> {
        self.load(name)?.ok_or_else(|| CorralError::NotFound {
            kind: "network",
            id: name.to_owned(),
        })
    }

    /// Every stored network, sorted by name. Directories without a
    /// config (claimed but never completed) are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<NetworkConfig>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.root.clone(),
                    source: e,
                });
            }
        };
        let mut networks = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(Some(config)) => networks.push(config),
                Ok(None) => {}
                Err(e) => tracing::warn!(network = %name, error = %e, "skipping unreadable network"),
            }
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Removes network `name` and its allocator state.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _ = persist::remove_dir_idempotent(&self.dir(name))?;
        Ok(())
    }
}
