//! The `bridge` network driver.
//!
//! A network is a Linux bridge named after it, holding the gateway
//! address, with a MASQUERADE rule for its subnet. Each container is
//! attached through a veth pair: the host end is enslaved to the bridge,
//! the peer is moved into the container's network namespace, renamed to
//! `eth0` and given the allocated address and a default route.

use std::sync::Arc;

use corral_common::error::{CorralError, Result};

use crate::command::{CommandRunner, SystemRunner};
use crate::driver::NetworkDriver;
use crate::firewall::{self, DnatRule, MasqueradeRule, RuleOp};
use crate::network::{Endpoint, NetworkConfig};

/// Driver name.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Interface name of the container end once inside the namespace.
pub const CONTAINER_IFNAME: &str = "eth0";

/// Bridge driver over a [`CommandRunner`].
#[derive(Clone)]
pub struct BridgeDriver {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver").finish_non_exhaustive()
    }
}

impl Default for BridgeDriver {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl BridgeDriver {
    /// Driver issuing host commands through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn ip(&self, args: &[&str]) -> Result<()> {
        let _ = self.runner.run("ip", args)?;
        Ok(())
    }

    /// Runs `ip` inside the network namespace of `pid`.
    fn ip_in(&self, pid: u32, args: &[&str]) -> Result<()> {
        let pid = pid.to_string();
        let mut full = vec!["-t", pid.as_str(), "-n", "ip"];
        full.extend_from_slice(args);
        let _ = self.runner.run("nsenter", &full)?;
        Ok(())
    }

    fn link_exists(&self, name: &str) -> bool {
        self.runner.run("ip", &["link", "show", name]).is_ok()
    }

    fn masquerade(config: &NetworkConfig) -> MasqueradeRule {
        MasqueradeRule {
            source: config.subnet,
            bridge: config.bridge().to_owned(),
        }
    }

    fn wire(&self, config: &NetworkConfig, endpoint: &Endpoint, pid: u32) -> Result<()> {
        let host = endpoint.host_link.as_str();
        let peer = endpoint.container_link.as_str();
        let pid_arg = pid.to_string();
        let addr = format!("{}/{}", endpoint.ip, config.subnet.prefix());
        let gateway = config.gateway.to_string();

        self.ip(&["link", "add", host, "type", "veth", "peer", "name", peer])?;
        self.ip(&["link", "set", host, "master", config.bridge()])?;
        self.ip(&["link", "set", host, "up"])?;
        self.ip(&["link", "set", peer, "netns", &pid_arg])?;

        self.ip_in(pid, &["link", "set", peer, "name", CONTAINER_IFNAME])?;
        self.ip_in(pid, &["addr", "add", &addr, "dev", CONTAINER_IFNAME])?;
        self.ip_in(pid, &["link", "set", CONTAINER_IFNAME, "up"])?;
        self.ip_in(pid, &["link", "set", "lo", "up"])?;
        self.ip_in(pid, &["route", "add", "default", "via", &gateway, "dev", CONTAINER_IFNAME])?;

        for mapping in &endpoint.ports {
            let rule = DnatRule::for_mapping(mapping, endpoint.ip);
            firewall::run_iptables(self.runner.as_ref(), &rule.iptables_args(RuleOp::Append))?;
        }
        Ok(())
    }

    fn remove_port_rules(&self, endpoint: &Endpoint) -> Vec<String> {
        let mut failures = Vec::new();
        for mapping in &endpoint.ports {
            let rule = DnatRule::for_mapping(mapping, endpoint.ip);
            if let Err(e) =
                firewall::run_iptables(self.runner.as_ref(), &rule.iptables_args(RuleOp::Delete))
            {
                failures.push(format!("port {mapping}: {e}"));
            }
        }
        failures
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &str {
        BRIDGE_DRIVER
    }

    fn create(&self, config: &NetworkConfig) -> Result<()> {
        let bridge = config.bridge();
        if self.link_exists(bridge) {
            return Err(CorralError::resource(format!(
                "interface {bridge} already exists on the host"
            )));
        }
        self.ip(&["link", "add", "name", bridge, "type", "bridge"])?;
        let configure = || -> Result<()> {
            self.ip(&["addr", "add", &config.gateway_cidr(), "dev", bridge])?;
            self.ip(&["link", "set", bridge, "up"])?;
            firewall::run_iptables(
                self.runner.as_ref(),
                &Self::masquerade(config).iptables_args(RuleOp::Append),
            )
        };
        if let Err(e) = configure() {
            let _ = self.ip(&["link", "del", bridge]);
            return Err(e);
        }
        firewall::enable_ip_forward();
        tracing::info!(network = %config.name, subnet = %config.subnet, "bridge created");
        Ok(())
    }

    fn delete(&self, config: &NetworkConfig) -> Result<()> {
        let bridge = config.bridge();
        if let Err(e) = firewall::run_iptables(
            self.runner.as_ref(),
            &Self::masquerade(config).iptables_args(RuleOp::Delete),
        ) {
            tracing::warn!(network = %config.name, error = %e, "masquerade rule not removed");
        }
        if self.link_exists(bridge) {
            self.ip(&["link", "del", bridge])?;
        } else {
            tracing::debug!(bridge, "bridge already absent");
        }
        tracing::info!(network = %config.name, "bridge deleted");
        Ok(())
    }

    fn connect(&self, config: &NetworkConfig, endpoint: &Endpoint, pid: u32) -> Result<()> {
        if let Err(e) = self.wire(config, endpoint, pid) {
            let _ = self.remove_port_rules(endpoint);
            // Deleting either end removes the pair.
            let _ = self.ip(&["link", "del", &endpoint.host_link]);
            return Err(e);
        }
        tracing::info!(
            network = %config.name,
            container = %endpoint.container_id,
            ip = %endpoint.ip,
            "endpoint connected"
        );
        Ok(())
    }

    fn disconnect(&self, config: &NetworkConfig, endpoint: &Endpoint) -> Result<()> {
        let failures = self.remove_port_rules(endpoint);
        for failure in &failures {
            tracing::warn!(network = %config.name, failure = %failure, "port rule not removed");
        }
        // The pair disappears with the container's namespace, so a missing
        // link is the normal case after the container exited.
        if self.link_exists(&endpoint.host_link) {
            self.ip(&["link", "del", &endpoint.host_link])?;
        }
        tracing::info!(network = %config.name, container = %endpoint.container_id, "endpoint disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use corral_common::types::ContainerId;

    use super::*;

    /// Records commands; fails any whose joined form starts with one of
    /// the configured prefixes.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> Result<String> {
            let line = format!("{program} {}", args.join(" "));
            self.calls.lock().expect("lock").push(line.clone());
            if self.fail.iter().any(|f| line.starts_with(f.as_str())) {
                return Err(CorralError::resource(format!("{line} failed")));
            }
            Ok(String::new())
        }
    }

    fn config() -> NetworkConfig {
        NetworkConfig::new("testnet", BRIDGE_DRIVER, "172.30.0.0/24").expect("config")
    }

    fn endpoint() -> Endpoint {
        Endpoint::new(
            &ContainerId::new("0123456789abcdef"),
            Ipv4Addr::new(172, 30, 0, 2),
            &["8080:80".parse().expect("port")],
        )
    }

    fn driver(fail: &[&str]) -> (BridgeDriver, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            calls: Mutex::default(),
            fail: fail.iter().map(ToString::to_string).collect(),
        });
        (BridgeDriver::new(recorder.clone()), recorder)
    }

    #[test]
    fn create_builds_bridge_and_masquerade() {
        let (driver, rec) = driver(&["ip link show"]);
        driver.create(&config()).expect("create");
        let calls = rec.calls.lock().expect("lock");
        assert_eq!(
            calls[1..],
            [
                "ip link add name testnet type bridge",
                "ip addr add 172.30.0.1/24 dev testnet",
                "ip link set testnet up",
                "iptables -t nat -A POSTROUTING -s 172.30.0.0/24 ! -o testnet -j MASQUERADE",
            ]
        );
    }

    #[test]
    fn create_refuses_existing_interface() {
        let (driver, rec) = driver(&[]);
        assert!(driver.create(&config()).is_err());
        assert_eq!(rec.calls.lock().expect("lock").len(), 1);
    }

    #[test]
    fn failed_create_removes_half_built_bridge() {
        let (driver, rec) = driver(&["ip link show", "ip addr add"]);
        assert!(driver.create(&config()).is_err());
        let calls = rec.calls.lock().expect("lock");
        assert_eq!(calls.last().map(String::as_str), Some("ip link del testnet"));
    }

    #[test]
    fn connect_wires_veth_into_namespace() {
        let (driver, rec) = driver(&[]);
        driver.connect(&config(), &endpoint(), 4242).expect("connect");
        let calls = rec.calls.lock().expect("lock");
        assert_eq!(
            *calls,
            [
                "ip link add veth01234567 type veth peer name ceth01234567",
                "ip link set veth01234567 master testnet",
                "ip link set veth01234567 up",
                "ip link set ceth01234567 netns 4242",
                "nsenter -t 4242 -n ip link set ceth01234567 name eth0",
                "nsenter -t 4242 -n ip addr add 172.30.0.2/24 dev eth0",
                "nsenter -t 4242 -n ip link set eth0 up",
                "nsenter -t 4242 -n ip link set lo up",
                "nsenter -t 4242 -n ip route add default via 172.30.0.1 dev eth0",
                "iptables -t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 172.30.0.2:80",
            ]
        );
    }

    #[test]
    fn failed_connect_removes_link() {
        let (driver, rec) = driver(&["nsenter -t 4242 -n ip addr"]);
        assert!(driver.connect(&config(), &endpoint(), 4242).is_err());
        let calls = rec.calls.lock().expect("lock");
        assert_eq!(calls.last().map(String::as_str), Some("ip link del veth01234567"));
        assert!(!calls.iter().any(|c| c.contains("-A PREROUTING")));
    }

    #[test]
    fn disconnect_removes_rules_and_link() {
        let (driver, rec) = driver(&[]);
        driver.disconnect(&config(), &endpoint()).expect("disconnect");
        let calls = rec.calls.lock().expect("lock");
        assert!(calls[0].starts_with("iptables -t nat -D PREROUTING"));
        assert_eq!(calls.last().map(String::as_str), Some("ip link del veth01234567"));
    }

    #[test]
    fn disconnect_tolerates_missing_link() {
        let (driver, rec) = driver(&["ip link show", "iptables"]);
        driver.disconnect(&config(), &endpoint()).expect("idempotent");
        assert!(!rec.calls.lock().expect("lock").iter().any(|c| c.contains("link del")));
    }
}
