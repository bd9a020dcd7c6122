//! Run the sandbox control API.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::api;
use crate::config::{Config, CONFIG_FILE};
use crate::sandbox::{DockerRuntime, ManagerSettings, SandboxManager};

/// Options for `sshbox serve`. Each overrides the config file.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "SSHBOX_PORT")]
    pub port: Option<u16>,

    /// Sandbox image reference
    #[arg(long, env = "SSHBOX_IMAGE")]
    pub image: Option<String>,

    /// Removal endpoint base handed to the idle watcher
    #[arg(long, env = "SSHBOX_CALLBACK_URL")]
    pub callback_url: Option<String>,

    /// Default SSH username
    #[arg(long, env = "SSHBOX_SSH_USER")]
    pub ssh_user: Option<String>,

    /// Default SSH password
    #[arg(long, env = "SSHBOX_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(image) = &self.image {
            config.sandbox.image.clone_from(image);
        }
        if let Some(url) = &self.callback_url {
            config.sandbox.callback_url = Some(url.clone());
        }
        if let Some(user) = &self.ssh_user {
            config.ssh.username.clone_from(user);
        }
        if let Some(password) = &self.ssh_password {
            config.ssh.password.clone_from(password);
        }
    }
}

pub async fn run(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = Config::load(&config_path)?;
    args.apply(&mut config);
    config.validate()?;

    let settings = ManagerSettings::from_config(&config)?;
    let runtime = DockerRuntime::connect().await?;
    let manager = Arc::new(SandboxManager::new(Arc::new(runtime), settings));

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        "SSH sandbox API running on {} (image {}, ports {:?})",
        addr, config.sandbox.image, config.sandbox.ports
    );

    axum::serve(listener, api::router(manager))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
