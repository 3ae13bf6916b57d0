//! Root filesystem provisioning.
//!
//! [`RootfsProvider`] is the seam between the lifecycle controller and
//! the filesystem: it hands out a merged root directory for a container
//! and tears it down again. [`OverlayRootfs`] is the production
//! implementation on top of the image store and `OverlayFS`.

use std::path::{Component, Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, Sha256Hash, VolumeSpec};
use corral_core::filesystem::mount;
use corral_core::filesystem::overlayfs::{self, OverlayConfig};
use serde::{Deserialize, Serialize};

use crate::store::{ImageStore, validate_image_name};

/// Result of committing a container to a new image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Image name the snapshot is stored under.
    pub name: String,
    /// Path of the written tarball.
    pub path: PathBuf,
    /// SHA-256 digest of the tarball.
    pub digest: Sha256Hash,
}

/// Supplies and reclaims container root filesystems.
pub trait RootfsProvider: Send + Sync {
    /// Prepares the merged root for container `id` from `image`, with
    /// `volume` bound into it, and returns the merged directory.
    ///
    /// # Errors
    ///
    /// Returns not-found for unknown images and a resource error if the
    /// workspace cannot be mounted. Nothing is left mounted on failure.
    fn mount(&self, id: &ContainerId, image: &str, volume: Option<&VolumeSpec>) -> Result<PathBuf>;

    /// Releases everything [`RootfsProvider::mount`] set up for `id`.
    /// Calling it for a container with no workspace is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing mount or directory cannot be removed.
    fn unmount(&self, id: &ContainerId, volume: Option<&VolumeSpec>) -> Result<()>;

    /// Snapshots the merged root of `id` into a new image `image_name`.
    ///
    /// # Errors
    ///
    /// Returns not-found if the container has no workspace.
    fn commit(&self, id: &ContainerId, image_name: &str) -> Result<ImageArtifact>;
}

/// `OverlayFS`-backed provider.
///
/// Workspaces live at `<overlay_root>/<id>/{upper,work,merged}`.
#[derive(Debug, Clone)]
pub struct OverlayRootfs {
    images: ImageStore,
    overlay_root: PathBuf,
}

impl OverlayRootfs {
    /// Creates a provider over an image directory and a workspace root.
    #[must_use]
    pub fn new(image_dir: impl Into<PathBuf>, overlay_root: impl Into<PathBuf>) -> Self {
        Self {
            images: ImageStore::new(image_dir),
            overlay_root: overlay_root.into(),
        }
    }

    /// Returns the image store.
    #[must_use]
    pub const fn images(&self) -> &ImageStore {
        &self.images
    }

    fn workspace(&self, id: &ContainerId) -> PathBuf {
        self.overlay_root.join(id.as_str())
    }

    /// Merged root directory of container `id`.
    #[must_use]
    pub fn merged_dir(&self, id: &ContainerId) -> PathBuf {
        self.workspace(id).join("merged")
    }
}

/// Where `volume` appears on the host once bound into `merged`.
#[must_use]
pub fn volume_target(merged: &Path, volume: &VolumeSpec) -> PathBuf {
    let relative: PathBuf = volume
        .container_path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    merged.join(relative)
}

impl RootfsProvider for OverlayRootfs {
    fn mount(&self, id: &ContainerId, image: &str, volume: Option<&VolumeSpec>) -> Result<PathBuf> {
        let lower = self.images.unpacked(image)?;
        let workspace = self.workspace(id);
        let config = OverlayConfig::under(&workspace, lower);

        if let Err(e) = overlayfs::mount_overlay(&config) {
            let _ = corral_common::persist::remove_dir_idempotent(&workspace);
            return Err(e);
        }
        if let Some(volume) = volume {
            let target = volume_target(&config.merged_dir, volume);
            if let Err(e) = mount::bind_mount(&volume.host_path, &target) {
                let _ = self.unmount(id, None);
                return Err(e);
            }
            tracing::info!(id = %id, volume = %volume, "volume bound");
        }
        tracing::info!(id = %id, image, "rootfs ready");
        Ok(config.merged_dir)
    }

    fn unmount(&self, id: &ContainerId, volume: Option<&VolumeSpec>) -> Result<()> {
        let workspace = self.workspace(id);
        if !workspace.exists() {
            tracing::debug!(id = %id, "no rootfs workspace to remove");
            return Ok(());
        }
        let merged = self.merged_dir(id);
        if let Some(volume) = volume {
            let _ = mount::unmount(&volume_target(&merged, volume))?;
        }
        let _ = mount::unmount(&merged)?;
        let _ = corral_common::persist::remove_dir_idempotent(&workspace)?;
        tracing::info!(id = %id, "rootfs removed");
        Ok(())
    }

    fn commit(&self, id: &ContainerId, image_name: &str) -> Result<ImageArtifact> {
        validate_image_name(image_name)?;
        let merged = self.merged_dir(id);
        if !merged.is_dir() {
            return Err(CorralError::NotFound {
                kind: "container workspace",
                id: id.to_string(),
            });
        }
        if self.images.contains(image_name) {
            return Err(CorralError::validation(format!(
                "image '{image_name}' already exists"
            )));
        }
        let path = self.images.archive_path(image_name);
        let digest = crate::commit::archive_dir(&merged, &path)?;
        Ok(ImageArtifact {
            name: image_name.to_owned(),
            path,
            digest,
        })
    }
}
