//! `corral logs`: Print a container's captured output.

use std::io::Write;

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container id, id prefix or name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or its log is unreadable.
pub fn execute(args: LogsArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let runtime = Runtime::new(config)?;
    let logs = runtime.logs(&args.container)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(logs.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
