//! `gateway-init`: bootstrap coordinator for the agent gateway.
//!
//! Run as the container entrypoint (`start`, the default), from a timer
//! (`watch`), or by hand (`ensure`, `sync`, `status`).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use claw_config_patch::GatewayEnv;
use tokio::sync::watch as shutdown;
use tracing::{error, info};

use claw_gateway_init::config::ConfigArgs;
use claw_gateway_init::gateway::{LaunchMode, OpenClawCli};
use claw_gateway_init::watch::{self, WatchConfig};
use claw_gateway_init::{health, logging, status, sync, BootstrapConfig, Coordinator, Outcome, VERSION};

#[derive(Parser)]
#[command(name = "gateway-init")]
#[command(about = "Restore, configure and launch the agent gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap and replace this process with the gateway (default)
    Start,

    /// Bootstrap and start the gateway in the background
    Ensure {
        /// Wait up to this many seconds for the gateway port to open
        #[arg(long, default_value_t = 0)]
        wait_secs: u64,
    },

    /// Copy local state to the backup store
    Sync,

    /// Keep the gateway running and periodically sync the backup
    Watch {
        /// Seconds between checks
        #[arg(long, env = "GATEWAY_INIT_WATCH_INTERVAL_SECS", default_value_t = 60)]
        interval_secs: u64,

        /// Sync the backup every N checks with a live gateway (0 disables)
        #[arg(long, env = "GATEWAY_INIT_SYNC_EVERY", default_value_t = 5)]
        sync_every: u32,
    },

    /// Print a JSON status report
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = BootstrapConfig::from(cli.config);

    if let Err(e) = logging::init(&config.log_path) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    info!(version = VERSION, pid = std::process::id(), "gateway-init starting");

    match run(config, cli.command.unwrap_or(Commands::Start)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway-init failed");
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    }
}

async fn run(config: BootstrapConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Start => {
            let coordinator = coordinator(config, LaunchMode::Exec);
            // Exec only returns here when the gateway was already running.
            report(coordinator.ensure_running().await?);
            Ok(())
        }
        Commands::Ensure { wait_secs } => {
            let port = config.port;
            let probe_timeout = config.probe_timeout;
            let coordinator = coordinator(config, LaunchMode::Spawn);
            let outcome = coordinator.ensure_running().await?;
            report(outcome);
            println!("{}", outcome);

            if wait_secs > 0
                && !health::wait_until_listening(port, Duration::from_secs(wait_secs), probe_timeout).await
            {
                anyhow::bail!("gateway did not open port {} within {}s", port, wait_secs);
            }
            Ok(())
        }
        Commands::Sync => {
            let report = sync::sync_to_backup(&config)
                .await
                .context("backup sync failed")?;
            println!("{}", report.marker);
            Ok(())
        }
        Commands::Watch {
            interval_secs,
            sync_every,
        } => {
            let coordinator = coordinator(config, LaunchMode::Spawn);
            let (shutdown_tx, shutdown_rx) = shutdown::channel(false);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received shutdown signal");
                    let _ = shutdown_tx.send(true);
                }
            });

            let settings = WatchConfig {
                interval: Duration::from_secs(interval_secs.max(1)),
                sync_every,
            };
            watch::run(&coordinator, settings, shutdown_rx).await;
            Ok(())
        }
        Commands::Status => {
            let report = status::collect(&config).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn coordinator(config: BootstrapConfig, mode: LaunchMode) -> Coordinator {
    let gateway = OpenClawCli::new(
        config.gateway_bin.clone(),
        mode,
        config.onboard_timeout,
        &config.gateway_log_path,
    );
    Coordinator::new(config, GatewayEnv::from_env(), Arc::new(gateway))
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::AlreadyRunning => info!("gateway already running, nothing to do"),
        Outcome::Started { pid } => info!(pid, "gateway started"),
    }
}
