//! Sandbox lifecycle: create, list and remove.
//!
//! The manager holds no sandbox state of its own. Every decision is re-derived
//! from the runtime, except for two in-process tables that close the
//! check-then-act windows: names being created and ports being bound.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::error::SandboxError;
use super::ports::PortAllocator;
use super::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ResourceLimits, RuntimeError, LABEL_MANAGED,
    LABEL_PORT, LABEL_USER,
};
use crate::config::{parse_cpus, parse_memory_limit, Config};

/// Settings the manager needs, resolved once from `Config`.
#[derive(Debug, Clone)]
pub(crate) struct ManagerSettings {
    pub image: String,
    pub callback_url: String,
    pub default_username: String,
    pub default_password: String,
    pub container_port: u16,
    pub ports: Vec<u16>,
    pub name_filter: Option<String>,
    pub limits: ResourceLimits,
    pub pull_timeout: Duration,
    pub start_timeout: Duration,
    pub poll_interval_secs: u64,
    pub grace_secs: u64,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sandbox = &config.sandbox;
        Ok(Self {
            image: sandbox.image.clone(),
            callback_url: config.callback_url(),
            default_username: config.ssh.username.clone(),
            default_password: config.ssh.password.clone(),
            container_port: config.ssh.container_port,
            ports: sandbox.ports.clone(),
            name_filter: sandbox.name_filter.clone(),
            limits: ResourceLimits {
                memory_bytes: parse_memory_limit(&sandbox.resources.memory)?,
                nano_cpus: parse_cpus(&sandbox.resources.cpus)?,
                pids_limit: sandbox.resources.pids_limit,
            },
            pull_timeout: sandbox.timeouts.pull(),
            start_timeout: sandbox.timeouts.start(),
            poll_interval_secs: config.idle.poll_interval_secs,
            grace_secs: config.idle.grace_secs,
        })
    }
}

/// Optional credentials supplied at creation time.
#[derive(Debug, Clone, Default)]
pub(crate) struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// What a successful create hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CreatedSandbox {
    pub name: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// One row of the sandbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SandboxSummary {
    pub name: String,
    pub status: String,
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Orchestrates sandbox create/list/remove over a container runtime.
pub(crate) struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    allocator: PortAllocator,
    settings: ManagerSettings,
    creating: Mutex<HashSet<String>>,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ManagerSettings) -> Self {
        Self {
            runtime,
            allocator: PortAllocator::new(settings.ports.clone()),
            settings,
            creating: Mutex::new(HashSet::new()),
        }
    }

    /// Create and start a sandbox named `name`.
    #[instrument(skip(self, credentials))]
    pub async fn create(
        &self,
        name: &str,
        credentials: Credentials,
    ) -> Result<CreatedSandbox, SandboxError> {
        validate_name(name)?;
        let username = credentials
            .username
            .unwrap_or_else(|| self.settings.default_username.clone());
        let password = credentials
            .password
            .unwrap_or_else(|| self.settings.default_password.clone());
        validate_username(&username)?;
        validate_password(&password)?;

        let _claim = NameClaim::acquire(&self.creating, name)?;

        if self
            .runtime
            .find(name)
            .await
            .map_err(|e| SandboxError::runtime(e.to_string()))?
            .is_some()
        {
            return Err(SandboxError::already_exists(name));
        }

        let lease = self.allocator.reserve(self.runtime.as_ref(), name).await?;
        let port = lease.port();
        info!("Creating sandbox {} on port {}", name, port);

        self.ensure_image().await?;

        let spec = self.container_spec(name, port, &username, &password);
        let started = tokio::time::timeout(self.settings.start_timeout, async {
            self.runtime.create(&spec).await.map_err(|e| match e {
                RuntimeError::Conflict(_) => SandboxError::already_exists(name),
                other => SandboxError::runtime(format!("create failed: {other}")),
            })?;
            self.runtime
                .start(name)
                .await
                .map_err(|e| SandboxError::start_failure(name, e.to_string()))
        })
        .await;

        match started {
            Ok(Ok(())) => {
                lease.commit();
                info!("Sandbox {} running on port {}", name, port);
                Ok(CreatedSandbox {
                    name: name.to_string(),
                    port,
                    username,
                    password,
                })
            }
            Ok(Err(e)) => {
                lease.release();
                warn!("Sandbox {} failed: {}", name, e);
                Err(e)
            }
            Err(_) => {
                lease.release();
                warn!("Sandbox {} did not start in time", name);
                Err(SandboxError::start_timeout(name, self.settings.start_timeout))
            }
        }
    }

    /// All sandboxes known to the runtime.
    pub async fn list(&self) -> Result<Vec<SandboxSummary>, SandboxError> {
        let containers = self
            .runtime
            .list()
            .await
            .map_err(|e| SandboxError::runtime(e.to_string()))?;

        Ok(containers
            .iter()
            .filter(|c| self.is_sandbox(c))
            .map(summarize)
            .collect())
    }

    /// Force-remove a sandbox by name or runtime id.
    ///
    /// Containers this service did not create are reported as `NotFound`
    /// and left alone.
    #[instrument(skip(self))]
    pub async fn remove(&self, name_or_id: &str) -> Result<(), SandboxError> {
        match self.runtime.find(name_or_id).await {
            Ok(Some(container)) if container.is_managed() => {}
            Ok(Some(_)) => {
                warn!("Refusing to remove unmanaged container {}", name_or_id);
                return Err(SandboxError::not_found(name_or_id));
            }
            Ok(None) => return Err(SandboxError::not_found(name_or_id)),
            Err(e) => {
                warn!("Looking up {} failed: {}", name_or_id, e);
                return Err(SandboxError::not_found(name_or_id));
            }
        }

        match self.runtime.remove(name_or_id).await {
            Ok(()) => {
                info!("Removed sandbox {}", name_or_id);
                Ok(())
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!("Sandbox {} already gone", name_or_id);
                Err(SandboxError::not_found(name_or_id))
            }
            Err(e) => {
                warn!("Removing {} failed: {}", name_or_id, e);
                Err(SandboxError::not_found(name_or_id))
            }
        }
    }

    /// Make sure the sandbox image is local, pulling it within the bound.
    async fn ensure_image(&self) -> Result<(), SandboxError> {
        let image = &self.settings.image;
        let present = self
            .runtime
            .image_exists(image)
            .await
            .map_err(|e| SandboxError::image_pull_failure(image, e.to_string()))?;
        if present {
            return Ok(());
        }

        info!("Image {} not found locally. Pulling...", image);
        match tokio::time::timeout(self.settings.pull_timeout, self.runtime.pull_image(image)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SandboxError::image_pull_failure(image, e.to_string())),
            Err(_) => Err(SandboxError::image_pull_timeout(
                image,
                self.settings.pull_timeout,
            )),
        }
    }

    fn container_spec(
        &self,
        name: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> ContainerSpec {
        let s = &self.settings;
        let env = vec![
            format!("SSHBOX_SANDBOX_NAME={name}"),
            format!("SSHBOX_USER={username}"),
            format!("SSHBOX_PASSWORD={password}"),
            format!("SSHBOX_CALLBACK_URL={}", s.callback_url),
            format!("SSHBOX_POLL_INTERVAL_SECS={}", s.poll_interval_secs),
            format!("SSHBOX_IDLE_GRACE_SECS={}", s.grace_secs),
        ];

        let labels = HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PORT.to_string(), port.to_string()),
            (LABEL_USER.to_string(), username.to_string()),
        ]);

        ContainerSpec {
            name: name.to_string(),
            image: s.image.clone(),
            container_port: s.container_port,
            host_port: port,
            env,
            labels,
            limits: s.limits,
        }
    }

    fn is_sandbox(&self, container: &ContainerInfo) -> bool {
        if !container.is_managed() {
            return false;
        }
        match &self.settings.name_filter {
            Some(marker) => container.name.contains(marker.as_str()),
            None => true,
        }
    }
}

fn summarize(container: &ContainerInfo) -> SandboxSummary {
    SandboxSummary {
        name: container.name.clone(),
        status: container.state.clone(),
        port: container.ssh_port(),
        username: container.username().map(str::to_string),
    }
}

/// Marks a name as being created; released on drop.
struct NameClaim<'a> {
    table: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> NameClaim<'a> {
    fn acquire(table: &'a Mutex<HashSet<String>>, name: &str) -> Result<Self, SandboxError> {
        let mut names = table.lock().unwrap_or_else(PoisonError::into_inner);
        if !names.insert(name.to_string()) {
            return Err(SandboxError::already_exists(name));
        }
        Ok(Self {
            table,
            name: name.to_string(),
        })
    }
}

impl Drop for NameClaim<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Docker's container name rule: `[a-zA-Z0-9][a-zA-Z0-9_.-]+`.
fn validate_name(name: &str) -> Result<(), SandboxError> {
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if !valid_first || !valid_rest || name.len() < 2 || name.len() > 128 {
        return Err(SandboxError::invalid_request(format!(
            "invalid sandbox name '{name}'"
        )));
    }
    Ok(())
}

/// POSIX-ish login name: `[a-z_][a-z0-9_-]*`, at most 32 characters.
fn validate_username(username: &str) -> Result<(), SandboxError> {
    let mut chars = username.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'));

    if !valid_first || !valid_rest || username.len() > 32 || username == "root" {
        return Err(SandboxError::invalid_request(format!(
            "invalid username '{username}'"
        )));
    }
    Ok(())
}

/// Passwords are fed to `chpasswd` as `user:password` lines.
fn validate_password(password: &str) -> Result<(), SandboxError> {
    if password.is_empty() || password.contains(['\n', '\r', ':']) {
        return Err(SandboxError::invalid_request(
            "password must be non-empty and contain no newlines or ':'",
        ));
    }
    Ok(())
}
