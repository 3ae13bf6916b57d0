//! Global configuration model for the Corral runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CorralError, Result};

/// Root configuration for the Corral runtime.
///
/// Every persisted path is a deterministic function of `root_dir`, so
/// lookups by id or name never require a directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base directory for Corral state and data.
    pub root_dir: PathBuf,
    /// Mount point of the cgroup filesystem.
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,
    /// Directory holding image tarballs. Defaults to `<root>/images`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<PathBuf>,
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from(constants::CGROUP_ROOT)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let root_dir = std::env::var_os(constants::ROOT_ENV)
            .map_or_else(|| PathBuf::from(constants::DEFAULT_ROOT_DIR), PathBuf::from);
        Self::with_root(root_dir)
    }
}

/// On-disk overrides read from `<root>/config.json`.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    cgroup_root: Option<PathBuf>,
    image_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Creates a configuration rooted at `root_dir` with default paths.
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cgroup_root: default_cgroup_root(),
            image_dir: None,
        }
    }

    /// Loads the configuration for `root_dir`, applying any overrides
    /// found in `<root>/config.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the override file exists but cannot be read or
    /// parsed.
    pub fn load(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::with_root(root_dir);
        let path = config.root_dir.join(constants::RUNTIME_CONFIG_FILE);
        let overrides: ConfigOverrides = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigOverrides::default(),
            Err(e) => return Err(CorralError::Io { path, source: e }),
        };
        if let Some(cgroup_root) = overrides.cgroup_root {
            config.cgroup_root = cgroup_root;
        }
        config.image_dir = overrides.image_dir;
        tracing::debug!(root = %config.root_dir.display(), "runtime configuration loaded");
        Ok(config)
    }

    /// Directory holding one subdirectory per container id.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root_dir.join(constants::CONTAINERS_DIR)
    }

    /// Directory holding the container name index.
    #[must_use]
    pub fn names_dir(&self) -> PathBuf {
        self.root_dir.join(constants::NAMES_DIR)
    }

    /// Directory holding one subdirectory per network.
    #[must_use]
    pub fn networks_dir(&self) -> PathBuf {
        self.root_dir.join(constants::NETWORKS_DIR)
    }

    /// Directory holding image tarballs and unpacked images.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.image_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join(constants::IMAGES_DIR))
    }

    /// Directory holding per-container overlay workspaces.
    #[must_use]
    pub fn overlay_dir(&self) -> PathBuf {
        self.root_dir.join(constants::OVERLAY_DIR)
    }

    /// Returns the state root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_root() {
        let config = RuntimeConfig::with_root("/tmp/corral");
        assert_eq!(config.containers_dir(), PathBuf::from("/tmp/corral/containers"));
        assert_eq!(config.networks_dir(), PathBuf::from("/tmp/corral/networks"));
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/corral/images"));
        assert_eq!(config.cgroup_root, PathBuf::from(constants::CGROUP_ROOT));
    }

    #[test]
    fn load_without_override_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RuntimeConfig::load(dir.path()).expect("load");
        assert_eq!(config, RuntimeConfig::with_root(dir.path()));
    }

    #[test]
    fn load_applies_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(constants::RUNTIME_CONFIG_FILE),
            r#"{"cgroup_root": "/tmp/cg", "image_dir": "/opt/images"}"#,
        )
        .expect("write");
        let config = RuntimeConfig::load(dir.path()).expect("load");
        assert_eq!(config.cgroup_root, PathBuf::from("/tmp/cg"));
        assert_eq!(config.images_dir(), PathBuf::from("/opt/images"));
    }

    #[test]
    fn load_rejects_malformed_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(constants::RUNTIME_CONFIG_FILE), "{nope").expect("write");
        assert!(RuntimeConfig::load(dir.path()).is_err());
    }
}
