//! Network and endpoint descriptions.

use std::net::Ipv4Addr;

use corral_common::constants::IFNAME_MAX;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, PortMapping};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Characters of the container id used in veth link names.
const LINK_ID_CHARS: usize = 8;

/// Persisted description of a virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Unique network name; also the bridge device name.
    pub name: String,
    /// Driver that owns the network's devices.
    pub driver: String,
    /// Normalised IPv4 subnet.
    pub subnet: Ipv4Network,
    /// Gateway address assigned to the bridge.
    pub gateway: Ipv4Addr,
}

impl NetworkConfig {
    /// Builds a config for `name`, normalising `subnet` to its network
    /// address and picking the lowest host address as the gateway.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the name or subnet is unusable.
    pub fn new(name: &str, driver: &str, subnet: &str) -> Result<Self> {
        validate_network_name(name)?;
        let subnet = parse_subnet(subnet)?;
        Ok(Self {
            name: name.to_owned(),
            driver: driver.to_owned(),
            gateway: gateway_of(subnet),
            subnet,
        })
    }

    /// The bridge device backing this network.
    #[must_use]
    pub fn bridge(&self) -> &str {
        &self.name
    }

    /// Gateway with the subnet prefix, as assigned to the bridge.
    #[must_use]
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.subnet.prefix())
    }
}

/// A container's attachment to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Attached container.
    pub container_id: ContainerId,
    /// Address allocated to the container.
    pub ip: Ipv4Addr,
    /// Host end of the veth pair (attached to the bridge).
    pub host_link: String,
    /// Container end of the veth pair before it is renamed to `eth0`.
    pub container_link: String,
    /// Published ports.
    pub ports: Vec<PortMapping>,
}

impl Endpoint {
    /// Describes the endpoint of `container_id` at `ip`. Link names are
    /// derived from the id, so a later disconnect can rebuild them.
    #[must_use]
    pub fn new(container_id: &ContainerId, ip: Ipv4Addr, ports: &[PortMapping]) -> Self {
        let tag: String = container_id.as_str().chars().take(LINK_ID_CHARS).collect();
        Self {
            container_id: container_id.clone(),
            ip,
            host_link: format!("veth{tag}"),
            container_link: format!("ceth{tag}"),
            ports: ports.to_vec(),
        }
    }
}

/// Network names double as interface names.
///
/// # Errors
///
/// Returns a validation error unless the name is 1 to 15 ASCII
/// alphanumerics, `-` or `_`.
pub fn validate_network_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > IFNAME_MAX {
        return Err(CorralError::validation(format!(
            "network name '{name}' must be 1-{IFNAME_MAX} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CorralError::validation(format!(
            "network name '{name}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Parses a CIDR subnet, dropping host bits.
///
/// # Errors
///
/// Returns a validation error for malformed input or a prefix too long to
/// hold a gateway and at least one container.
pub fn parse_subnet(cidr: &str) -> Result<Ipv4Network> {
    let parsed: Ipv4Network = cidr
        .parse()
        .map_err(|e| CorralError::validation(format!("invalid subnet '{cidr}': {e}")))?;
    if parsed.prefix() > 30 {
        return Err(CorralError::validation(format!(
            "subnet '{cidr}' is too small; use a prefix of /30 or shorter"
        )));
    }
    Ipv4Network::new(parsed.network(), parsed.prefix())
        .map_err(|e| CorralError::validation(format!("invalid subnet '{cidr}': {e}")))
}

/// Lowest usable host address of `subnet`.
#[must_use]
pub fn gateway_of(subnet: Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet.network()).saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_normalises_subnet_and_picks_gateway() {
        let config = NetworkConfig::new("testnet", "bridge", "192.168.50.77/24").expect("config");
        assert_eq!(config.subnet.to_string(), "192.168.50.0/24");
        assert_eq!(config.gateway, Ipv4Addr::new(192, 168, 50, 1));
        assert_eq!(config.gateway_cidr(), "192.168.50.1/24");
        assert_eq!(config.bridge(), "testnet");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_network_name("ok-net_1").is_ok());
        assert!(validate_network_name("").is_err());
        assert!(validate_network_name("this-name-is-too-long").is_err());
        assert!(validate_network_name("bad name").is_err());
        assert!(validate_network_name("a/b").is_err());
    }

    #[test]
    fn rejects_unusable_subnets() {
        assert!(parse_subnet("10.0.0.0/30").is_ok());
        assert!(parse_subnet("10.0.0.0/31").is_err());
        assert!(parse_subnet("10.0.0.0").is_err(), "bare address is a /32");
        assert!(parse_subnet("not-a-subnet").is_err());
    }

    #[test]
    fn link_names_fit_interface_limit() {
        let id = ContainerId::generate();
        let endpoint = Endpoint::new(&id, Ipv4Addr::new(10, 0, 0, 2), &[]);
        assert!(endpoint.host_link.len() <= IFNAME_MAX);
        assert!(endpoint.host_link.starts_with("veth"));
        assert!(endpoint.container_link.starts_with("ceth"));
        assert_eq!(endpoint.host_link[4..], endpoint.container_link[4..]);
    }
}
