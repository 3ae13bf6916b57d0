//! # corral-core
//!
//! Low-level Linux isolation primitives for the Corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: PID, Mount, UTS, IPC and Network isolation, plus
//!   joining the namespaces of a running process.
//! - **Cgroups**: per-container memory, CPU-share and CPU-set limits on
//!   either the unified (v2) or legacy (v1) hierarchy.
//! - **Filesystem**: `OverlayFS` mounts, bind mounts, and `pivot_root`.
//! - **Hand-off**: the one-shot channel that releases a launched process.
//! - **Process**: `clone(2)`-based creation of an isolated child.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod handoff;
pub mod namespace;
pub mod process;

use corral_common::error::CorralError;

/// Error returned by syscall wrappers on platforms without Linux
/// namespaces.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn linux_required() -> CorralError {
    CorralError::process("Linux required for native container operations")
}
