//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` workspaces, `pivot_root` for switching the root
//! filesystem, and the mount helpers the container init needs.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
