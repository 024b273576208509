// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// `sven gateway` subcommands: everything short of starting the daemon
/// itself (that's the top-level `serve` command).
#[derive(Subcommand, Debug)]
pub enum GatewayCommands {
    /// Report whether a gateway is currently running against this data
    /// directory, and since when.
    Status {
        /// Path to the gateway config file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Regenerate the HTTP bearer token.
    ///
    /// The new token is printed once. The old token is immediately invalidated.
    RegenerateToken {
        /// Path to the gateway config file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "sven",
    about = "A locally-hosted coding assistant daemon",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway: HTTP+SSE API, session store, and tool-call
    /// scheduler. Blocks until Ctrl+C / SIGTERM.
    Serve {
        /// Path to the gateway config file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Gateway administration: token rotation, liveness status.
    Gateway {
        #[command(subcommand)]
        command: GatewayCommands,
    },

    /// Print the effective gateway and agent configuration and exit.
    ShowConfig {
        /// Path to the gateway config file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Generate shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sven", &mut std::io::stdout());
}
