use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, HostConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

use super::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, RuntimeError};

/// Lets the idle watcher reach the host's control API on Linux.
const HOST_GATEWAY: &str = "host.docker.internal:host-gateway";

/// `ContainerRuntime` backed by the local Docker daemon.
#[derive(Clone)]
pub(crate) struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local daemon and make sure it answers.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Failed to connect to Docker. Is Docker running? ({e})"
            ))
        })?;

        docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Cannot ping Docker daemon. Is Docker running? ({e})"
            ))
        })?;

        Ok(Self { docker })
    }

    /// The underlying client, for image builds and listings.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn find(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => Ok(Some(from_inspect(details))),
            Err(e) => match classify(e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(classify)?;

        Ok(containers.into_iter().map(from_summary).collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!("Pulling Docker image: {}", image);

        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(classify)?;
            if let Some(error) = output.error {
                return Err(RuntimeError::Failed(format!("Docker pull error: {error}")));
            }
            if let Some(status) = output.status {
                debug!("pull {}: {}", image, status.trim());
            }
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        debug!("Creating container: {}", spec.name);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                build_container_config(spec),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        debug!("Starting container: {}", name);
        self.docker
            .start_container::<String>(name, None)
            .await
            .map_err(classify)
    }

    async fn remove(&self, name_or_id: &str) -> Result<(), RuntimeError> {
        debug!("Removing container: {}", name_or_id);
        self.docker
            .remove_container(
                name_or_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify)
    }
}

fn build_container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
    let ssh_port = format!("{}/tcp", spec.container_port);

    let port_bindings = HashMap::from([(
        ssh_port.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        }]),
    )]);

    ContainerConfig {
        image: Some(spec.image.clone()),
        tty: Some(true),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(HashMap::from([(ssh_port, HashMap::new())])),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(spec.limits.memory_bytes),
            nano_cpus: Some(spec.limits.nano_cpus),
            pids_limit: Some(spec.limits.pids_limit),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            extra_hosts: Some(vec![HOST_GATEWAY.to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Map Docker's HTTP status codes onto the runtime error kinds.
fn classify(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        BollardError::DockerResponseServerError { message, .. }
            if message.contains("port is already allocated") =>
        {
            RuntimeError::Conflict(message)
        }
        BollardError::DockerResponseServerError { message, .. } => RuntimeError::Failed(message),
        other => RuntimeError::Failed(other.to_string()),
    }
}

fn from_summary(summary: ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let host_ports = summary
        .ports
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.public_port)
        .collect();

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name,
        state: summary.state.unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        host_ports,
    }
}

fn from_inspect(details: ContainerInspectResponse) -> ContainerInfo {
    let state = details
        .state
        .and_then(|s| s.status)
        .map(|s| s.to_string())
        .unwrap_or_default();

    let labels = details
        .config
        .and_then(|c| c.labels)
        .unwrap_or_default();

    let host_ports = details
        .network_settings
        .and_then(|n| n.ports)
        .unwrap_or_default()
        .into_values()
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.and_then(|p| p.parse().ok()))
        .collect();

    ContainerInfo {
        id: details.id.unwrap_or_default(),
        name: details
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        state,
        labels,
        host_ports,
    }
}
