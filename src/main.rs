//! sshbox: short-lived SSH sandboxes on Docker.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod commands;
mod config;
mod sandbox;
mod templates;
mod watcher;

#[derive(Parser)]
#[command(name = "sshbox")]
#[command(
    author,
    version,
    about = "Short-lived SSH sandboxes on Docker with idle reclamation"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to sshbox.toml
    #[arg(long, global = true, env = "SSHBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sandbox control API
    Serve(commands::serve::ServeArgs),

    /// Watch for SSH sessions inside a sandbox and request removal when idle
    Watch(commands::watch::WatchArgs),

    /// Manage the sandbox image
    Image {
        #[command(subcommand)]
        action: commands::image::ImageAction,
    },

    /// Write a default sshbox.toml and the sandbox image sources
    Init {
        /// Force overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("sshbox=debug,tower_http=debug")
    } else {
        EnvFilter::new("sshbox=info,tower_http=info")
    };

    // The watcher runs detached inside the sandbox, so its log also goes to a file
    let (file_layer, _guard) = match &cli.command {
        Commands::Watch(args) => match &args.log_file {
            Some(path) => {
                let (writer, guard) = commands::watch::log_writer(path)?;
                (
                    Some(fmt::layer().with_ansi(false).with_writer(writer)),
                    Some(guard),
                )
            }
            None => (None, None),
        },
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve(args) => {
            commands::serve::run(args, cli.config).await?;
        }
        Commands::Watch(args) => {
            commands::watch::run(args).await?;
        }
        Commands::Image { action } => {
            commands::image::run(action, cli.config).await?;
        }
        Commands::Init { force } => {
            commands::init::run(force)?;
        }
    }

    Ok(())
}
