//! `corral network`: Manage networks.

use clap::{Args, Subcommand};
use corral_common::config::RuntimeConfig;
use corral_common::constants::DEFAULT_DRIVER;
use corral_runtime::Runtime;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network with its own bridge and address pool.
    Create {
        /// Network driver.
        #[arg(long, default_value = DEFAULT_DRIVER)]
        driver: String,
        /// IPv4 subnet in CIDR form, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name; also the bridge device name.
        name: String,
    },
    /// List networks.
    #[command(visible_alias = "ls")]
    List,
    /// Remove a network no container uses.
    #[command(visible_alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes a `network` subcommand.
///
/// # Errors
///
/// Returns an error if the operation fails.
pub fn execute(args: NetworkArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let runtime = Runtime::new(config)?;
    match args.command {
        NetworkCommand::Create {
            driver,
            subnet,
            name,
        } => {
            let network = runtime.create_network(&driver, &subnet, &name)?;
            println!("{}", network.name);
        }
        NetworkCommand::List => {
            println!("{:<16} {:<10} {:<20} {}", "NAME", "DRIVER", "SUBNET", "GATEWAY");
            for n in runtime.list_networks()? {
                println!(
                    "{:<16} {:<10} {:<20} {}",
                    n.name,
                    n.driver,
                    n.subnet.to_string(),
                    n.gateway
                );
            }
        }
        NetworkCommand::Remove { name } => {
            runtime.remove_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}
