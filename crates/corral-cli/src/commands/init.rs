//! `corral init`: Entry point of a new container process.

use clap::Args;

/// Arguments for the hidden `init` command. There are none: the command
/// arrives over the hand-off channel.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Waits for the command and replaces this process with it.
///
/// # Errors
///
/// Returns an error if no command arrives or the root switch or exec
/// fails. On success this never returns.
pub fn execute(_args: InitArgs) -> anyhow::Result<()> {
    match corral_runtime::init::run_init()? {}
}
