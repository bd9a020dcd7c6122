//! Container runtime seam.
//!
//! The lifecycle manager and the port allocator only see this trait, so the
//! Docker backend can be swapped for an in-memory double in tests.

use async_trait::async_trait;
use std::collections::HashMap;

/// Label marking a container as a managed sandbox.
pub(crate) const LABEL_MANAGED: &str = "sshbox.managed";
/// Label recording the host port a sandbox was allocated.
pub(crate) const LABEL_PORT: &str = "sshbox.port";
/// Label recording the sandbox's SSH user.
pub(crate) const LABEL_USER: &str = "sshbox.user";

/// Errors reported by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with existing state (name taken, port bound).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The runtime could not be reached.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Runtime state, e.g. "created", "running", "exited".
    pub state: String,
    pub labels: HashMap<String, String>,
    /// Host ports currently published (only populated while running).
    pub host_ports: Vec<u16>,
}

impl ContainerInfo {
    /// True when the container was created by this service.
    pub fn is_managed(&self) -> bool {
        self.labels.get(LABEL_MANAGED).is_some_and(|v| v == "true")
    }

    /// Port recorded at creation time, readable even when stopped.
    pub fn labelled_port(&self) -> Option<u16> {
        self.labels.get(LABEL_PORT).and_then(|p| p.parse().ok())
    }

    /// The sandbox's SSH port: the published port if running, else the label.
    pub fn ssh_port(&self) -> Option<u16> {
        self.host_ports.first().copied().or_else(|| self.labelled_port())
    }

    /// Every host port this container holds or will hold once started.
    pub fn occupied_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.host_ports.iter().copied().chain(self.labelled_port())
    }

    pub fn username(&self) -> Option<&str> {
        self.labels.get(LABEL_USER).map(String::as_str)
    }
}

/// Resource ceilings applied to each sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

/// Everything the runtime needs to create one sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// SSH port inside the container.
    pub container_port: u16,
    /// Host port the SSH port is published on.
    pub host_port: u16,
    /// `KEY=value` pairs for the bootstrap and the idle watcher.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub limits: ResourceLimits,
}

/// Primitive operations over isolated compute containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by name or id. `Ok(None)` means it does not exist.
    async fn find(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    /// All containers, running or not.
    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pull an image, returning once the pull has completed.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Forced removal (stop then delete) by name or id.
    async fn remove(&self, name_or_id: &str) -> Result<(), RuntimeError>;
}
