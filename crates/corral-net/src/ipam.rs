//! Persistent IPv4 address allocation.
//!
//! Each network keeps its allocations in `ipam.json` next to its config.
//! Every read-modify-write of that file happens under an exclusive
//! `flock(2)` on `ipam.lock`, so concurrent `run` invocations in separate
//! processes never hand out the same address.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use corral_common::constants::{IPAM_FILE, IPAM_LOCK_FILE};
use corral_common::error::{CorralError, Result};
use corral_common::persist;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Current on-disk schema version of [`AddressAllocation`].
pub const ALLOCATION_SCHEMA_VERSION: u32 = 1;

/// Persisted allocation state of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAllocation {
    /// Schema version.
    pub version: u32,
    /// Subnet addresses are drawn from.
    pub subnet: Ipv4Network,
    /// Gateway, never handed out.
    pub gateway: Ipv4Addr,
    /// Allocated addresses and the container id holding each.
    #[serde(default)]
    pub allocated: BTreeMap<Ipv4Addr, String>,
}

impl AddressAllocation {
    /// Empty allocation over `subnet`.
    #[must_use]
    pub const fn new(subnet: Ipv4Network, gateway: Ipv4Addr) -> Self {
        Self {
            version: ALLOCATION_SCHEMA_VERSION,
            subnet,
            gateway,
            allocated: BTreeMap::new(),
        }
    }

    /// Addresses that can be handed out: every host address except the
    /// network, broadcast and gateway addresses.
    pub fn assignable(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let base = u32::from(self.subnet.network());
        let size = self.subnet.size();
        (1..size.saturating_sub(1))
            .map(move |offset| Ipv4Addr::from(base.wrapping_add(offset)))
            .filter(move |ip| *ip != self.gateway)
    }

    /// Hands the lowest free address to `owner`. An owner that already
    /// holds an address gets the same one back.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the pool is exhausted.
    pub fn allocate(&mut self, owner: &str) -> Result<Ipv4Addr> {
        if let Some((ip, _)) = self.allocated.iter().find(|(_, o)| o.as_str() == owner) {
            return Ok(*ip);
        }
        let free = self
            .assignable()
            .find(|ip| !self.allocated.contains_key(ip))
            .ok_or_else(|| {
                CorralError::resource(format!("address pool {} exhausted", self.subnet))
            })?;
        let _ = self.allocated.insert(free, owner.to_owned());
        Ok(free)
    }

    /// Returns `ip` to the pool if `owner` holds it.
    pub fn release(&mut self, ip: Ipv4Addr, owner: &str) -> bool {
        if self.allocated.get(&ip).is_some_and(|o| o == owner) {
            let _ = self.allocated.remove(&ip);
            true
        } else {
            false
        }
    }
}

/// Allocator bound to one network directory.
#[derive(Debug, Clone)]
pub struct Ipam {
    dir: PathBuf,
}

impl Ipam {
    /// Allocator for the network stored in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(IPAM_FILE)
    }

    /// Writes an empty allocation for a freshly created network.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn initialize(&self, subnet: Ipv4Network, gateway: Ipv4Addr) -> Result<()> {
        let _lock = self.lock()?;
        persist::write_json(&self.state_path(), &AddressAllocation::new(subnet, gateway))
    }

    /// Reads the current allocation.
    ///
    /// # Errors
    ///
    /// Returns not-found if the network has no allocation state.
    pub fn snapshot(&self) -> Result<AddressAllocation> {
        let _lock = self.lock()?;
        self.load()
    }

    /// Atomically allocates an address for `owner`.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the pool is exhausted, and an error
    /// if the state cannot be read or written.
    pub fn allocate(&self, owner: &str) -> Result<Ipv4Addr> {
        let _lock = self.lock()?;
        let mut state = self.load()?;
        let ip = state.allocate(owner)?;
        persist::write_json(&self.state_path(), &state)?;
        tracing::debug!(ip = %ip, owner, "address allocated");
        Ok(ip)
    }

    /// Atomically releases `ip` if `owner` holds it. Returns whether
    /// anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or written.
    pub fn release(&self, ip: Ipv4Addr, owner: &str) -> Result<bool> {
        let _lock = self.lock()?;
        let mut state = self.load()?;
        if !state.release(ip, owner) {
            tracing::debug!(ip = %ip, owner, "address not held by owner; nothing released");
            return Ok(false);
        }
        persist::write_json(&self.state_path(), &state)?;
        tracing::debug!(ip = %ip, owner, "address released");
        Ok(true)
    }

    fn load(&self) -> Result<AddressAllocation> {
        let state: AddressAllocation =
            persist::read_json(&self.state_path())?.ok_or_else(|| CorralError::NotFound {
                kind: "address pool",
                id: self.dir.display().to_string(),
            })?;
        persist::check_schema("address pool", state.version, ALLOCATION_SCHEMA_VERSION)?;
        Ok(state)
    }

    /// Takes the allocator lock. Released when the guard drops.
    fn lock(&self) -> Result<nix::fcntl::Flock<File>> {
        lock_exclusive(&self.dir.join(IPAM_LOCK_FILE))
    }
}

fn lock_exclusive(path: &Path) -> Result<nix::fcntl::Flock<File>> {
    use nix::fcntl::{Flock, FlockArg};

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CorralError::NotFound {
                    kind: "network",
                    id: path
                        .parent()
                        .and_then(Path::file_name)
                        .map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
                }
            } else {
                CorralError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| CorralError::resource(format!("lock {}: {errno}", path.display())))
}
