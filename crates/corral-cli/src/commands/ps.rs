//! `corral ps`: List containers.

use clap::Args;
use corral_common::config::RuntimeConfig;
use corral_runtime::Runtime;

use crate::output::{format_age, format_ports, or_dash, truncate};

/// Widest command shown before truncation.
const COMMAND_WIDTH: usize = 24;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print only container ids.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `ps` command.
///
/// Status is what the process table says now, so a container whose
/// process died shows as stopped even before its record is updated.
///
/// # Errors
///
/// Returns an error if the state directory cannot be read.
pub fn execute(args: PsArgs, config: RuntimeConfig) -> anyhow::Result<()> {
    let runtime = Runtime::new(config)?;
    let containers = runtime.list()?;

    if args.quiet {
        for c in &containers {
            println!("{}", c.id);
        }
        return Ok(());
    }

    println!(
        "{:<14} {:<16} {:<8} {:<9} {:<12} {:<24} {:<16} {:<18} {}",
        "CONTAINER ID", "NAME", "PID", "STATUS", "IMAGE", "COMMAND", "IP", "CREATED", "PORTS"
    );
    let now = chrono::Utc::now();
    for c in &containers {
        let command = truncate(&c.command.join(" "), COMMAND_WIDTH);
        println!(
            "{:<14} {:<16} {:<8} {:<9} {:<12} {:<24} {:<16} {:<18} {}",
            c.id.short(),
            or_dash(c.name.as_deref().unwrap_or_default()),
            c.pid.map_or_else(|| "-".to_owned(), |p| p.to_string()),
            c.status,
            c.image,
            command,
            c.ip_address.map_or_else(|| "-".to_owned(), |ip| ip.to_string()),
            format_age(c.created_at, now),
            format_ports(&c.port_mappings),
        );
    }
    Ok(())
}
