//! hoard: operator commands against a PostgreSQL-backed hoard deployment.
//!
//! Configuration comes from the environment (and `.env`). See `hoard_core::config`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hoard_cli::{channel_row, find_channel, init_tracing};
use hoard_core::models::channel::ChannelExport;
use hoard_core::{Config, SystemClock};
use hoard_services::{Hoard, HoardRepositories};

#[derive(Parser)]
#[command(name = "hoard", about = "Hoard storage operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the retention reaper and task workers until interrupted
    Reaper,
    /// Run one retention sweep and exit
    Sweep,
    /// Manage storage channels
    Channels {
        #[command(subcommand)]
        command: ChannelCommands,
    },
}

#[derive(Subcommand)]
enum ChannelCommands {
    /// List configured channels
    List,
    /// Print every channel as a JSON export document
    Export {
        /// Include secret values instead of masking them
        #[arg(long)]
        include_secrets: bool,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Apply a JSON export document
    Import {
        file: PathBuf,
        /// Replace channels that already exist with the same name
        #[arg(long)]
        overwrite: bool,
    },
    /// Make a channel the default destination
    SetDefault {
        /// Channel name or id
        channel: String,
    },
    /// Enable a channel
    Enable { channel: String },
    /// Disable a channel
    Disable { channel: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = hoard_db::connect(&config).await?;
    hoard_db::run_migrations(&pool).await?;

    let hoard = Hoard::new(
        config,
        HoardRepositories::postgres(pool),
        Arc::new(SystemClock),
    )
    .await?;

    let result = run(&hoard, cli.command).await;
    hoard.shutdown().await;
    result
}

async fn run(hoard: &Arc<Hoard>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Reaper => {
            let handle = hoard.start_reaper();
            shutdown_signal().await?;
            handle.abort();
        }
        Commands::Sweep => {
            let report = hoard.sweep().await?;
            println!(
                "expired files: {}\ncascaded: {}\ncascade failures: {}\nsessions failed: {}\nscratch purged: {}\nsessions deleted: {}",
                report.expired_files,
                report.cascaded,
                report.cascade_failures,
                report.sessions_failed,
                report.scratch_purged,
                report.sessions_deleted,
            );
        }
        Commands::Channels { command } => run_channels(hoard, command).await?,
    }
    Ok(())
}

async fn run_channels(hoard: &Hoard, command: ChannelCommands) -> anyhow::Result<()> {
    let registry = hoard.channels();
    match command {
        ChannelCommands::List => {
            for channel in registry.list().await? {
                println!("{}", channel_row(&channel));
            }
        }
        ChannelCommands::Export {
            include_secrets,
            output,
        } => {
            let export = registry.export(include_secrets).await?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), channels = export.channels.len(), "Channels exported");
                }
                None => println!("{}", json),
            }
        }
        ChannelCommands::Import { file, overwrite } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let export: ChannelExport =
                serde_json::from_str(&raw).context("Invalid channel export document")?;
            let summary = registry.import(export, overwrite).await?;
            println!(
                "created: {}, updated: {}, skipped: {}",
                summary.created, summary.updated, summary.skipped
            );
        }
        ChannelCommands::SetDefault { channel } => {
            let id = resolve_channel(hoard, &channel).await?;
            let updated = registry.set_default(id).await?;
            println!("{}", channel_row(&updated));
        }
        ChannelCommands::Enable { channel } => {
            let id = resolve_channel(hoard, &channel).await?;
            println!("{}", channel_row(&registry.enable(id).await?));
        }
        ChannelCommands::Disable { channel } => {
            let id = resolve_channel(hoard, &channel).await?;
            println!("{}", channel_row(&registry.disable(id).await?));
        }
    }
    Ok(())
}

async fn resolve_channel(hoard: &Hoard, needle: &str) -> anyhow::Result<uuid::Uuid> {
    let channels = hoard.channels().list().await?;
    find_channel(&channels, needle)
        .map(|c| c.id)
        .ok_or_else(|| anyhow::anyhow!("No channel named or identified by '{}'", needle))
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install signal handler")?;

    #[cfg(unix)]
    tokio::select! {
        result = ctrl_c => {
            result.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate.recv() => {
            tracing::info!("Received terminate signal");
        },
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
