//! Network driver abstraction.

use corral_common::error::Result;

use crate::network::{Endpoint, NetworkConfig};

/// Creates and wires the host devices of a network.
///
/// Address allocation and persistence belong to the manager; a driver
/// only touches devices and packet-filter rules.
pub trait NetworkDriver: Send + Sync {
    /// Name selected with `network create --driver`.
    fn name(&self) -> &str;

    /// Creates the devices backing `config`.
    ///
    /// # Errors
    ///
    /// Returns a resource error if device creation fails.
    fn create(&self, config: &NetworkConfig) -> Result<()>;

    /// Removes the devices backing `config`.
    ///
    /// # Errors
    ///
    /// Returns a resource error if an existing device cannot be removed.
    fn delete(&self, config: &NetworkConfig) -> Result<()>;

    /// Attaches the network namespace of `pid` to the network as
    /// `endpoint`, including its published ports.
    ///
    /// # Errors
    ///
    /// Returns a resource error if any step fails; partial wiring is
    /// removed before returning.
    fn connect(&self, config: &NetworkConfig, endpoint: &Endpoint, pid: u32) -> Result<()>;

    /// Removes everything [`NetworkDriver::connect`] installed for
    /// `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error only if nothing could be cleaned up.
    fn disconnect(&self, config: &NetworkConfig, endpoint: &Endpoint) -> Result<()>;
}
