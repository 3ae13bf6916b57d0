//! On-disk image store.
//!
//! An image named `busybox` is a tarball `busybox.tar` (or `.tar.gz`,
//! `.tgz`) in the image directory. It is unpacked on first use into the
//! sibling directory `busybox/`, which then serves as the read-only lower
//! layer of every container started from it.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

use crate::layer;

/// Tarball extensions looked up, in order.
const ARCHIVE_EXTENSIONS: [&str; 3] = ["tar", "tar.gz", "tgz"];

/// Image directory handle.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory an image is (or will be) unpacked into.
    #[must_use]
    pub fn unpacked_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path of the tarball `commit` writes for `name`.
    #[must_use]
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.tar"))
    }

    /// Finds an existing tarball for `name`.
    #[must_use]
    pub fn find_archive(&self, name: &str) -> Option<PathBuf> {
        ARCHIVE_EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }

    /// Whether an image called `name` is present in either form.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.unpacked_path(name).is_dir() || self.find_archive(name).is_some()
    }

    /// Returns the unpacked directory for `name`, unpacking its tarball
    /// first if needed.
    ///
    /// Unpacking goes through a staging directory that is renamed into
    /// place, so an interrupted unpack never leaves a half-populated
    /// image behind.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed names, not-found if no
    /// tarball or directory exists, and an I/O error if unpacking fails.
    pub fn unpacked(&self, name: &str) -> Result<PathBuf> {
        validate_image_name(name)?;
        let target = self.unpacked_path(name);
        if target.is_dir() {
            return Ok(target);
        }
        let archive = self.find_archive(name).ok_or_else(|| CorralError::NotFound {
            kind: "image",
            id: name.to_owned(),
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".unpack-")
            .tempdir_in(&self.root)
            .map_err(|e| CorralError::Io {
                path: self.root.clone(),
                source: e,
            })?;
        layer::extract_archive(&archive, staging.path())?;
        match std::fs::rename(staging.path(), &target) {
            Ok(()) => {}
            // Another run unpacked the same image concurrently.
            Err(_) if target.is_dir() => {}
            Err(e) => {
                return Err(CorralError::Io {
                    path: target,
                    source: e,
                });
            }
        }
        tracing::info!(image = name, path = %target.display(), "image unpacked");
        Ok(target)
    }
}

/// Rejects image names that could escape the image directory.
///
/// # Errors
///
/// Returns [`CorralError::Validation`] for empty names, names containing
/// `/`, or names starting with `.`.
pub fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') || name.contains('\0') {
        return Err(CorralError::validation(format!("invalid image name '{name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::tests::write_tar;

    #[test]
    fn unpacks_tarball_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_tar(&dir.path().join("busybox.tar"), &[("bin/sh", b"#!")]);
        let store = ImageStore::new(dir.path());

        let first = store.unpacked("busybox").expect("unpack");
        assert_eq!(first, dir.path().join("busybox"));
        assert!(first.join("bin/sh").exists());

        std::fs::write(first.join("marker"), b"").expect("write");
        let second = store.unpacked("busybox").expect("reuse");
        assert!(second.join("marker").exists());
    }

    #[test]
    fn unpack_leaves_no_staging_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_tar(&dir.path().join("alpine.tar"), &[("x", b"")]);
        let store = ImageStore::new(dir.path());
        let _ = store.unpacked("alpine").expect("unpack");
        let leftovers = std::fs::read_dir(dir.path())
            .expect("readdir")
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".unpack-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::new(dir.path());
        assert!(!store.contains("ghost"));
        assert!(store.unpacked("ghost").expect_err("missing").is_not_found());
    }

    #[test]
    fn image_names_cannot_escape() {
        assert!(validate_image_name("busybox").is_ok());
        assert!(validate_image_name("../etc").is_err());
        assert!(validate_image_name("a/b").is_err());
        assert!(validate_image_name("").is_err());
    }
}
