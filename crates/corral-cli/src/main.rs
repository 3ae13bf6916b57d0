//! # corral
//!
//! Minimal container runtime: namespaced processes with cgroup limits,
//! bridge networking and persisted lifecycle state.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod commands;
mod daemon;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Inside a container, runtime chatter would land in the user's output.
    let default_level = if matches!(cli.command, Command::Init(_)) {
        "warn"
    } else {
        "info"
    };
    init_tracing(default_level, cli.log_json);
    commands::execute(cli)
}

fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
