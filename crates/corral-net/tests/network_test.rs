//! Integration tests for the network manager.
//!
//! Devices are never touched: a recording driver stands in for the
//! bridge driver, while address allocation and persistence run for real
//! against a temporary state directory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Barrier, Mutex};

use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerId;
use corral_net::{Endpoint, NetworkConfig, NetworkDriver, NetworkManager};

#[derive(Default)]
struct FakeDriver {
    events: Mutex<Vec<String>>,
    fail_create: bool,
    fail_connect: bool,
}

impl FakeDriver {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("lock").clone()
    }
}

impl NetworkDriver for FakeDriver {
    fn name(&self) -> &str {
        "bridge"
    }

    fn create(&self, config: &NetworkConfig) -> Result<()> {
        self.events.lock().expect("lock").push(format!("create {}", config.name));
        if self.fail_create {
            return Err(CorralError::resource("bridge creation refused"));
        }
        Ok(())
    }

    fn delete(&self, config: &NetworkConfig) -> Result<()> {
        self.events.lock().expect("lock").push(format!("delete {}", config.name));
        Ok(())
    }

    fn connect(&self, config: &NetworkConfig, endpoint: &Endpoint, pid: u32) -> Result<()> {
        self.events
            .lock()
            .expect("lock")
            .push(format!("connect {} {} {pid}", config.name, endpoint.ip));
        if self.fail_connect {
            return Err(CorralError::resource("veth creation refused"));
        }
        Ok(())
    }

    fn disconnect(&self, config: &NetworkConfig, endpoint: &Endpoint) -> Result<()> {
        self.events
            .lock()
            .expect("lock")
            .push(format!("disconnect {} {}", config.name, endpoint.ip));
        Ok(())
    }
}

fn manager(dir: &std::path::Path, driver: Arc<FakeDriver>) -> NetworkManager {
    let driver: Arc<dyn NetworkDriver> = driver;
    NetworkManager::with_drivers(dir.join("networks"), vec![driver])
}

// ── Create / list / remove ──────────────────────────────────────────

#[test]
fn create_persists_config_and_gateway() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = Arc::new(FakeDriver::default());
    let nm = manager(dir.path(), driver.clone());

    let config = nm
        .create_network("bridge", "192.168.99.0/24", "testnet")
        .expect("create");
    assert_eq!(config.gateway, Ipv4Addr::new(192, 168, 99, 1));
    assert_eq!(driver.events(), ["create testnet"]);

    let listed = nm.list_networks().expect("list");
    assert_eq!(listed, vec![config]);
}

#[test]
fn duplicate_names_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nm = manager(dir.path(), Arc::new(FakeDriver::default()));
    let _ = nm.create_network("bridge", "10.10.0.0/24", "dup").expect("first");
    let err = nm
        .create_network("bridge", "10.11.0.0/24", "dup")
        .expect_err("duplicate");
    assert!(matches!(err, CorralError::Validation { .. }));
}

#[test]
fn overlapping_subnets_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nm = manager(dir.path(), Arc::new(FakeDriver::default()));
    let _ = nm.create_network("bridge", "10.20.0.0/16", "wide").expect("first");
    assert!(nm.create_network("bridge", "10.20.5.0/24", "inner").is_err());
}

#[test]
fn unknown_driver_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = Arc::new(FakeDriver::default());
    let nm = manager(dir.path(), driver.clone());
    assert!(nm.create_network("macvlan", "10.30.0.0/24", "mv").is_err());
    assert!(driver.events().is_empty());
}

#[test]
fn failed_device_creation_persists_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = Arc::new(FakeDriver {
        fail_create: true,
        ..FakeDriver::default()
    });
    let nm = manager(dir.path(), driver);
    assert!(nm.create_network("bridge", "10.40.0.0/24", "broken").is_err());
    assert!(nm.list_networks().expect("list").is_empty());
    assert!(!dir.path().join("networks/broken").exists());
}

#[test]
fn delete_is_blocked_while_referenced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = Arc::new(FakeDriver::default());
    let nm = manager(dir.path(), driver.clone());
    let _ = nm.create_network("bridge", "10.50.0.0/24", "busy").expect("create");

    let holder = ContainerId::new("abcdef0123456789");
    let err = nm.delete_network("busy", &[holder]).expect_err("in use");
    assert!(err.to_string().contains("in use"));
    assert_eq!(nm.list_networks().expect("list").len(), 1);

    nm.delete_network("busy", &[]).expect("delete");
    assert!(nm.list_networks().expect("list").is_empty());
    assert_eq!(driver.events().last().map(String::as_str), Some("delete busy"));
    assert!(nm.delete_network("busy", &[]).expect_err("gone").is_not_found());
}

// ── Connect / disconnect ────────────────────────────────────────────

#[test]
fn connect_allocates_and_disconnect_releases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = Arc::new(FakeDriver::default());
    let nm = manager(dir.path(), driver.clone());
    let _ = nm.create_network("bridge", "10.60.0.0/24", "net").expect("create");

    let a = ContainerId::new("aaaaaaaaaaaa");
    let b = ContainerId::new("bbbbbbbbbbbb");
    let ea = nm.connect("net", &a, 100, &[]).expect("connect a");
    let eb = nm.connect("net", &b, 200, &["8080:80".parse().expect("port")]).expect("connect b");
    assert_eq!(ea.ip, Ipv4Addr::new(10, 60, 0, 2));
    assert_eq!(eb.ip, Ipv4Addr::new(10, 60, 0, 3));
    assert_eq!(eb.ports.len(), 1);

    nm.disconnect("net", &ea);
    let c = ContainerId::new("cccccccccccc");
    let ec = nm.connect("net", &c, 300, &[]).expect("connect c");
    assert_eq!(ec.ip, ea.ip, "released address is reused");
    assert!(driver.events().contains(&"disconnect net 10.60.0.2".to_owned()));
}

#[test]
fn failed_connect_releases_address() {
    let dir = tempfile::tempdir().expect("tempdir");
    let failing = Arc::new(FakeDriver {
        fail_connect: true,
        ..FakeDriver::default()
    });
    let nm = manager(dir.path(), failing);
    let _ = nm.create_network("bridge", "10.70.0.0/30", "tiny").expect("create");

    let id = ContainerId::new("dddddddddddd");
    assert!(nm.connect("tiny", &id, 1, &[]).is_err());

    // The single address of the /30 must be free again.
    let ok = manager(dir.path(), Arc::new(FakeDriver::default()));
    let endpoint = ok.connect("tiny", &id, 1, &[]).expect("address was released");
    assert_eq!(endpoint.ip, Ipv4Addr::new(10, 70, 0, 2));
}

#[test]
fn disconnect_from_unknown_network_only_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nm = manager(dir.path(), Arc::new(FakeDriver::default()));
    let endpoint = Endpoint::new(&ContainerId::new("eeee"), Ipv4Addr::new(10, 0, 0, 2), &[]);
    nm.disconnect("ghost", &endpoint);
}

#[test]
fn connect_to_unknown_network_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nm = manager(dir.path(), Arc::new(FakeDriver::default()));
    let err = nm
        .connect("ghost", &ContainerId::new("ffff"), 1, &[])
        .expect_err("unknown");
    assert!(err.is_not_found());
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn concurrent_connects_get_distinct_addresses_until_exhaustion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nm = manager(dir.path(), Arc::new(FakeDriver::default()));
    // A /29 has five assignable addresses once the gateway is taken.
    let _ = nm.create_network("bridge", "10.80.0.0/29", "race").expect("create");

    let workers = 5;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let nm = nm.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let id = ContainerId::new(format!("worker{i:02}aaaaaa"));
                barrier.wait();
                nm.connect("race", &id, 1000 + u32::try_from(i).expect("small"), &[])
                    .expect("connect")
                    .ip
            })
        })
        .collect();
    let ips: HashSet<Ipv4Addr> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();
    assert_eq!(ips.len(), workers, "no address handed out twice");

    let err = nm
        .connect("race", &ContainerId::new("latecomer000"), 9999, &[])
        .expect_err("pool exhausted");
    assert!(matches!(err, CorralError::Resource { .. }));
}
