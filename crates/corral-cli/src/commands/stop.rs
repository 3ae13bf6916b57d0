//! `corral stop`: Signal a running container to stop.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container id, id prefix or name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// Returns as soon as SIGTERM is sent; the process may still be shutting
/// down.
///
/// # Errors
///
/// Returns an error if the container is unknown or cannot be signalled.
pub fn execute(args: StopArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let record = Runtime::new(config)?.stop(&args.container)?;
    println!("{}", record.display_name());
    Ok(())
}
