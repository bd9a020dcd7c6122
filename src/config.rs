use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "sshbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub idle: IdleConfig,
}

/// Control API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_server_port(),
        }
    }
}

/// Credentials handed to sandboxes when the create request carries none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// SSH port inside the sandbox
    #[serde(default = "default_container_port")]
    pub container_port: u16,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            container_port: default_container_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image every sandbox is created from
    #[serde(default = "default_image")]
    pub image: String,

    /// Removal endpoint base the in-sandbox watcher calls back into.
    /// Unset means the host gateway on `server.port`.
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Host ports eligible for SSH publishing, in allocation order
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Only list containers whose name contains this marker
    #[serde(default)]
    pub name_filter: Option<String>,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Bounds on long-running runtime operations
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            callback_url: None,
            ports: default_ports(),
            name_filter: None,
            resources: ResourceConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "512m")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "1")
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Maximum number of processes
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_pull_secs")]
    pub pull_secs: u64,

    #[serde(default = "default_start_secs")]
    pub start_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pull_secs: default_pull_secs(),
            start_secs: default_start_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn pull(&self) -> Duration {
        Duration::from_secs(self.pull_secs)
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }
}

/// Parameters passed to the idle watcher inside each sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            grace_secs: default_grace(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_username() -> String {
    "tanu".to_string()
}

fn default_password() -> String {
    "123".to_string()
}

fn default_container_port() -> u16 {
    22
}

fn default_image() -> String {
    "sshbox-sandbox:latest".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![22001, 22002, 22003]
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_pids_limit() -> i64 {
    100
}

fn default_pull_secs() -> u64 {
    300
}

fn default_start_secs() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    5
}

fn default_grace() -> u64 {
    60
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Removal endpoint handed to sandboxes, following the listener port
    /// unless set explicitly
    pub fn callback_url(&self) -> String {
        match &self.sandbox.callback_url {
            Some(url) => url.clone(),
            None => format!(
                "http://host.docker.internal:{}/containers/remove",
                self.server.port
            ),
        }
    }

    /// Reject configurations the allocator or runtime could not work with
    pub fn validate(&self) -> Result<()> {
        if self.sandbox.ports.is_empty() {
            anyhow::bail!("sandbox.ports must contain at least one port");
        }

        let mut seen = HashSet::new();
        for port in &self.sandbox.ports {
            if !seen.insert(port) {
                anyhow::bail!("sandbox.ports contains duplicate port {port}");
            }
        }

        parse_memory_limit(&self.sandbox.resources.memory)?;
        parse_cpus(&self.sandbox.resources.cpus)?;
        Ok(())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
pub fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.to_lowercase();

    let (num, unit) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else {
        (limit.as_str(), 1)
    };

    let value: i64 = num.parse().context("Invalid memory limit")?;
    if value <= 0 {
        anyhow::bail!("Memory limit must be positive");
    }
    value
        .checked_mul(unit)
        .with_context(|| format!("Memory limit too large: {limit}"))
}

/// Parse a CPU count (e.g., "1", "0.5") into Docker nano-CPUs
#[allow(clippy::cast_possible_truncation)]
pub fn parse_cpus(cpus: &str) -> Result<i64> {
    let cpus: f64 = cpus.trim().parse().context("Invalid CPU limit")?;
    if !cpus.is_finite() || cpus <= 0.0 {
        anyhow::bail!("CPU limit must be a positive number");
    }

    let nano = cpus * 1_000_000_000.0;
    if nano >= 1.0e18 {
        anyhow::bail!("CPU limit too large: {cpus}");
    }
    Ok(nano as i64)
}
