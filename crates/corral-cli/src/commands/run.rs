//! `corral run`: Create and start a container.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_common::types::{PortMapping, ResourceConfig, VolumeSpec, parse_memory};
use corral_runtime::{RunOptions, RunOutcome, Runtime};

use crate::daemon;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run in the foreground, attached to this terminal.
    #[arg(short = 't', long, conflicts_with = "detach")]
    pub tty: bool,

    /// Run in the background and print the container id.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, e.g. `256m` or `1GiB`.
    #[arg(short, long, value_parser = parse_memory_arg)]
    pub memory: Option<u64>,

    /// Relative CPU weight (2-262144, 1024 is the default share).
    #[arg(long, value_parser = clap::value_parser!(u64).range(2..=262_144))]
    pub cpu_share: Option<u64>,

    /// CPUs the container may run on, e.g. `0-1,3`.
    #[arg(long)]
    pub cpu_set: Option<String>,

    /// Unique container name.
    #[arg(long)]
    pub name: Option<String>,

    /// Bind a host directory, `<host-path>:<container-path>`.
    #[arg(short, long)]
    pub volume: Option<VolumeSpec>,

    /// Environment variable `KEY=VALUE`; repeatable.
    #[arg(short, long = "env", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Network to attach the container to.
    #[arg(long)]
    pub network: Option<String>,

    /// Publish a port, `<host-port>:<container-port>[/tcp|/udp]`; repeatable.
    #[arg(short, long)]
    pub publish: Vec<PortMapping>,

    /// Image to build the root filesystem from.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

fn parse_memory_arg(s: &str) -> Result<u64, String> {
    parse_memory(s).map_err(|e| e.to_string())
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            image: self.image,
            command: self.command,
            name: self.name,
            tty: self.tty,
            resources: ResourceConfig {
                memory_bytes: self.memory,
                cpu_shares: self.cpu_share,
                cpuset: self.cpu_set,
            },
            volume: self.volume,
            env: self.env,
            network: self.network,
            ports: self.publish,
        }
    }
}

/// Executes the `run` command.
///
/// With `--tty` the container shares this terminal and the command exits
/// with the container's exit code. Otherwise a background monitor owns
/// the container and the id is printed.
///
/// # Errors
///
/// Returns an error if validation or any launch step fails.
pub fn execute(args: RunArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let options = args.into_options();
    if !options.tty {
        let id = daemon::run_in_background(config, options)?;
        println!("{id}");
        return Ok(());
    }

    // Ctrl+C reaches the container through the terminal; the runtime
    // stays alive to clean up after it.
    ctrlc::set_handler(|| tracing::debug!("interrupt forwarded to container"))
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let runtime = Runtime::new(config)?;
    match runtime.run(options)? {
        RunOutcome::Exited { id, code } => {
            tracing::info!(id = %id, code, "container exited");
            std::process::exit(code);
        }
        RunOutcome::Detached { monitor, .. } => {
            let code = monitor.wait()?;
            std::process::exit(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_entries_split_on_first_equals() {
        assert_eq!(
            parse_env("URL=a=b").expect("parse"),
            ("URL".to_owned(), "a=b".to_owned())
        );
        assert_eq!(parse_env("EMPTY=").expect("parse").1, "");
        assert!(parse_env("=x").is_err());
        assert!(parse_env("novalue").is_err());
    }

    #[test]
    fn memory_limits_accept_suffixes() {
        assert_eq!(parse_memory_arg("1g"), Ok(1 << 30));
        assert!(parse_memory_arg("lots").is_err());
    }
}
