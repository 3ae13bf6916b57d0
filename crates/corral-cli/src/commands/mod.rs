//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_common::config::RuntimeConfig;
use corral_common::constants::{DEFAULT_ROOT_DIR, ROOT_ENV};

/// Corral: a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding container, network and image state.
    #[arg(long, global = true, env = ROOT_ENV, default_value = DEFAULT_ROOT_DIR)]
    pub root: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container entry point. Started by the runtime, never by hand.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print a container's captured output.
    Logs(logs::LogsArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Send a running container SIGTERM.
    Stop(stop::StopArgs),
    /// Remove a container.
    Rm(rm::RmArgs),
    /// Save a container's filesystem as a new image.
    Commit(commit::CommitArgs),
    /// Manage networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = || RuntimeConfig::load(&cli.root);
    match cli.command {
        Command::Init(args) => init::execute(args),
        Command::Run(args) => run::execute(args, config()?),
        Command::Ps(args) => ps::execute(args, config()?),
        Command::Logs(args) => logs::execute(args, config()?),
        Command::Exec(args) => exec::execute(args, config()?),
        Command::Stop(args) => stop::execute(args, config()?),
        Command::Rm(args) => rm::execute(args, config()?),
        Command::Commit(args) => commit::execute(args, config()?),
        Command::Network(args) => network::execute(args, config()?),
    }
}
