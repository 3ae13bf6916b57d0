//! # corral-image
//!
//! Root filesystem provisioning for the Corral runtime.
//!
//! Handles:
//! - **Store**: image tarballs and their lazily unpacked directories.
//! - **Layers**: tar / tar.gz extraction.
//! - **Rootfs**: per-container `OverlayFS` workspaces and volume binds.
//! - **Commit**: snapshotting a container's merged view into a new image.
//! - **Hashing**: SHA-256 digests of image tarballs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod commit;
pub mod hash;
pub mod layer;
pub mod rootfs;
pub mod store;

pub use rootfs::{ImageArtifact, OverlayRootfs, RootfsProvider};
