//! Container lifecycle management for the Corral runtime.
//!
//! [`lifecycle::Runtime`] composes the launcher, cgroups, networking, the
//! rootfs provider and the [`state::StateStore`] into the `run`, `stop`,
//! `rm`, `exec` and `commit` operations. [`init`] and [`exec`] hold the
//! code that runs inside a container's namespaces.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod exec;
pub mod init;
pub mod launcher;
pub mod lifecycle;
pub mod logs;
pub mod monitor;
pub mod record;
pub mod state;

pub use launcher::{ContainerProcess, LaunchRequest, LaunchedProcess, ProcessLauncher};
pub use lifecycle::{RunOptions, RunOutcome, Runtime};
pub use record::ContainerRecord;
pub use state::StateStore;

/// Separator between command arguments on the init hand-off channel.
pub const ARG_SEPARATOR: char = '\0';

/// Joins a command for the hand-off channel.
#[must_use]
pub fn join_command(command: &[String]) -> String {
    command.join(&ARG_SEPARATOR.to_string())
}

/// Splits a command received on the hand-off channel. Empty arguments are
/// kept; only an empty message is an empty command.
#[must_use]
pub fn split_command(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(ARG_SEPARATOR).map(str::to_owned).collect()
}
