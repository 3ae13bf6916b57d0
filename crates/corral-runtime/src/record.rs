//! Persisted container records.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus, PortMapping, ResourceConfig, VolumeSpec};
use corral_net::Endpoint;
use serde::{Deserialize, Serialize};

/// Current on-disk schema version of [`ContainerRecord`].
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Longest accepted container name.
pub const NAME_MAX: usize = 64;

/// Identity and runtime facts of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    /// Schema version the record was written with.
    pub schema_version: u32,
    /// Generated, immutable id.
    pub id: ContainerId,
    /// Optional user-assigned name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Host pid of the container process; only set while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Command the container runs.
    pub command: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Image the root filesystem was built from.
    pub image: String,
    /// Bound volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSpec>,
    /// Network the container is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address on `network`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<Ipv4Addr>,
    /// Published ports.
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Applied resource limits.
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl ContainerRecord {
    /// Name if set, short id otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.short())
    }

    /// Whether the record claims a live process.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running && self.pid.is_some()
    }

    /// Marks the record stopped and forgets the pid.
    pub fn mark_stopped(&mut self) {
        self.status = ContainerStatus::Stopped;
        self.pid = None;
    }

    /// The network attachment, rebuilt from the persisted fields.
    #[must_use]
    pub fn endpoint(&self) -> Option<(&str, Endpoint)> {
        let network = self.network.as_deref()?;
        let ip = self.ip_address?;
        Some((network, Endpoint::new(&self.id, ip, &self.port_mappings)))
    }
}

/// Validates a user-supplied container name.
///
/// # Errors
///
/// Returns a validation error unless the name starts with an ASCII
/// alphanumeric and continues with alphanumerics, `_`, `.` or `-`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest || name.len() > NAME_MAX {
        return Err(CorralError::validation(format!(
            "invalid container name '{name}': use up to {NAME_MAX} letters, digits, '_', '.' or '-'"
        )));
    }
    Ok(())
}
