// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod gateway_lock;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, GatewayCommands};
use gateway_lock::LockFile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.unwrap_or(Commands::Serve { config: None }) {
        Commands::Serve { config } => serve(config.as_deref()).await,
        Commands::Gateway { command } => gateway_command(command).await,
        Commands::ShowConfig { config } => show_config(config.as_deref()),
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
    }
}

/// Start the gateway: refuse to start if a live one already owns this data
/// directory, reclaim a stale lock, write the lock once the real port is
/// known, and clean it up when the server returns.
async fn serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let gw_config = sven_gateway::config::load(config_path)?;
    let agent_config = sven_config::load(None)?;

    let lock_path = gw_config.lockfile_path();
    if lock_path.exists() {
        match LockFile::load(&lock_path) {
            Ok(existing) if !existing.is_stale().await => {
                anyhow::bail!(
                    "gateway already running: pid {} on port {} (started {})",
                    existing.pid,
                    existing.port,
                    existing.started_at
                );
            }
            Ok(existing) => {
                tracing::warn!(pid = existing.pid, port = existing.port, "reclaiming stale gateway lock");
                LockFile::remove(&lock_path);
            }
            Err(e) => {
                tracing::warn!(error = %e, "lockfile unreadable, removing it");
                LockFile::remove(&lock_path);
            }
        }
    }

    let lock_path_for_bind = lock_path.clone();
    let on_bound = move |addr: std::net::SocketAddr| {
        let lock = LockFile::new(addr.port());
        if let Err(e) = lock.save(&lock_path_for_bind) {
            tracing::warn!(error = %e, "failed to write gateway lockfile");
        }
    };

    let result = sven_gateway::gateway::run(gw_config, agent_config, on_bound).await;
    LockFile::remove(&lock_path);
    result
}

async fn gateway_command(cmd: GatewayCommands) -> anyhow::Result<()> {
    match cmd {
        GatewayCommands::Status { config } => {
            let gw_config = sven_gateway::config::load(config.as_deref())?;
            let lock_path = gw_config.lockfile_path();
            if !lock_path.exists() {
                println!("gateway: not running (no lockfile at {})", lock_path.display());
                return Ok(());
            }
            let lock = LockFile::load(&lock_path)?;
            if lock.is_stale().await {
                println!(
                    "gateway: not running (stale lock left by pid {}, port {})",
                    lock.pid, lock.port
                );
            } else {
                println!(
                    "gateway: running, pid {}, port {}, started {}",
                    lock.pid, lock.port, lock.started_at
                );
            }
            Ok(())
        }
        GatewayCommands::RegenerateToken { config } => {
            let gw_config = sven_gateway::config::load(config.as_deref())?;
            sven_gateway::gateway::regenerate_token(&gw_config)
        }
    }
}

fn show_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let gw_config = sven_gateway::config::load(config_path)?;
    let agent_config = sven_config::load(None)?;
    println!("# gateway");
    println!("{}", serde_yaml::to_string(&gw_config).unwrap_or_default());
    println!("# agent");
    println!("{}", serde_yaml::to_string(&agent_config).unwrap_or_default());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
