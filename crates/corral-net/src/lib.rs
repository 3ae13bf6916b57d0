//! # corral-net
//!
//! Single-host container networking for the Corral runtime.
//!
//! A network is a Linux bridge with an IPv4 subnet. Containers join it
//! through a veth pair whose container end lives in the container's
//! network namespace, get an address from a per-network allocator, and
//! can publish ports through DNAT rules.
//!
//! - [`manager::NetworkManager`]: create, list, remove, connect, disconnect.
//! - [`ipam`]: `flock`-guarded persistent address allocation.
//! - [`bridge::BridgeDriver`]: the `bridge` driver.
//! - [`firewall`]: MASQUERADE and DNAT rule construction.
//! - [`command`]: host command execution behind a trait.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod command;
pub mod driver;
pub mod firewall;
pub mod ipam;
pub mod manager;
pub mod network;
pub mod store;

pub use driver::NetworkDriver;
pub use manager::NetworkManager;
pub use network::{Endpoint, NetworkConfig};
