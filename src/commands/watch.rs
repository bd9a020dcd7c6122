//! Run the idle watcher inside a sandbox.
//!
//! Everything comes from the environment the control plane set at creation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::watcher::{HttpReclaimer, IdleWatcher, PgrepProbe, WatchTiming};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for `sshbox watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// User whose SSH sessions keep the sandbox alive
    #[arg(long, env = "SSHBOX_USER")]
    pub user: String,

    /// Sandbox name to request removal of (defaults to the hostname)
    #[arg(long, env = "SSHBOX_SANDBOX_NAME")]
    pub name: Option<String>,

    /// Removal endpoint base, e.g. http://host.docker.internal:8000/containers/remove
    #[arg(long, env = "SSHBOX_CALLBACK_URL")]
    pub callback_url: String,

    /// Seconds between session checks
    #[arg(long, env = "SSHBOX_POLL_INTERVAL_SECS", default_value = "5")]
    pub poll_interval_secs: u64,

    /// Seconds without a session before the sandbox is reclaimed
    #[arg(long, env = "SSHBOX_IDLE_GRACE_SECS", default_value = "60")]
    pub grace_secs: u64,

    /// Also write the monitor's log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let name = match args.name {
        Some(name) => name,
        None => hostname()?,
    };

    let reclaimer = HttpReclaimer::new(args.callback_url, CALLBACK_TIMEOUT)
        .context("Failed to build HTTP client")?;

    let watcher = IdleWatcher::new(
        name,
        PgrepProbe::new(args.user),
        reclaimer,
        WatchTiming {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            grace: Duration::from_secs(args.grace_secs),
        },
    );

    // One shot: exit after the callback whatever it returned
    watcher.run().await;
    Ok(())
}

/// Non-blocking file writer for the monitor's log.
pub fn log_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Docker sets the hostname to the short container id, which the removal
/// endpoint accepts as well as the name.
fn hostname() -> Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return Ok(name.trim().to_string());
        }
    }
    let name = std::fs::read_to_string("/etc/hostname").context("Failed to read /etc/hostname")?;
    Ok(name.trim().to_string())
}
