//! `iptables` rules for network egress and published ports.
//!
//! Rules are built as argument vectors and executed through a
//! [`CommandRunner`]; the same rule value produces the matching delete.

use std::net::Ipv4Addr;

use corral_common::error::Result;
use corral_common::types::{PortMapping, Protocol};
use ipnetwork::Ipv4Network;

use crate::command::CommandRunner;

/// Whether a rule is being installed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Append the rule (`-A`).
    Append,
    /// Delete the rule (`-D`).
    Delete,
}

impl RuleOp {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

/// Source NAT for traffic leaving a network through any other interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasqueradeRule {
    /// Network subnet.
    pub source: Ipv4Network,
    /// Bridge the subnet lives on.
    pub bridge: String,
}

impl MasqueradeRule {
    /// `iptables` arguments for `op`.
    #[must_use]
    pub fn iptables_args(&self, op: RuleOp) -> Vec<String> {
        [
            "-t",
            "nat",
            op.flag(),
            "POSTROUTING",
            "-s",
            &self.source.to_string(),
            "!",
            "-o",
            &self.bridge,
            "-j",
            "MASQUERADE",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

/// Destination NAT from a host port to a container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnatRule {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port on the host.
    pub host_port: u16,
    /// Container address.
    pub container_ip: Ipv4Addr,
    /// Port inside the container.
    pub container_port: u16,
}

impl DnatRule {
    /// Rule publishing `mapping` on `container_ip`.
    #[must_use]
    pub const fn for_mapping(mapping: &PortMapping, container_ip: Ipv4Addr) -> Self {
        Self {
            protocol: mapping.protocol,
            host_port: mapping.host_port,
            container_ip,
            container_port: mapping.container_port,
        }
    }

    /// `iptables` arguments for `op`.
    #[must_use]
    pub fn iptables_args(&self, op: RuleOp) -> Vec<String> {
        let proto = self.protocol.as_str();
        [
            "-t",
            "nat",
            op.flag(),
            "PREROUTING",
            "-p",
            proto,
            "-m",
            proto,
            "--dport",
            &self.host_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{}:{}", self.container_ip, self.container_port),
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

/// Runs `iptables` with `args`.
///
/// # Errors
///
/// Returns the runner's error if the rule cannot be applied.
pub fn run_iptables(runner: &dyn CommandRunner, args: &[String]) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let _ = runner.run("iptables", &args)?;
    Ok(())
}

/// Enables IPv4 forwarding on the host; logged, not fatal.
pub fn enable_ip_forward() {
    if let Err(e) = std::fs::write("/proc/sys/net/ipv4/ip_forward", "1") {
        tracing::warn!(error = %e, "could not enable IP forwarding");
    } else {
        tracing::debug!("IP forwarding enabled");
    }
}
