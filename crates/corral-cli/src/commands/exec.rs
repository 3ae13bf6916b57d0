//! `corral exec`: Run a command inside a running container.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;
use corral_runtime::exec::{enter_and_run, reentrant_pid};

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container id, id prefix or name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command and exits with the command's exit code.
///
/// The first call looks the container up and re-executes the runtime with
/// the target pid in `CORRAL_EXEC_PID`; that second call joins the
/// container's namespaces and runs the command.
///
/// # Errors
///
/// Returns an error if the container is not running or the namespaces
/// cannot be joined.
pub fn execute(args: ExecArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let code = match reentrant_pid() {
        Some(pid) => enter_and_run(pid, &args.command)?,
        None => Runtime::new(config)?.exec(&args.container, &args.command)?,
    };
    std::process::exit(code);
}
