//! `corral rm`: Remove a container.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container id, id prefix or name.
    pub container: String,

    /// Stop the container first if it is running.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, running without
/// `--force`, or its state cannot be deleted.
pub fn execute(args: RmArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    Runtime::new(config)?.remove(&args.container, args.force)?;
    println!("{}", args.container);
    Ok(())
}
