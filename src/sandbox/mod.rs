//! Docker-backed SSH sandboxes.
//!
//! The lifecycle manager allocates a host port from a fixed pool, creates the
//! container through the runtime seam, and removes it on request.

mod docker;
mod error;
mod manager;
#[cfg(test)]
mod mock;
mod ports;
mod runtime;

pub(crate) use docker::DockerRuntime;
pub(crate) use error::SandboxError;
pub(crate) use manager::{
    CreatedSandbox, Credentials, ManagerSettings, SandboxManager, SandboxSummary,
};
#[cfg(test)]
pub(crate) use mock::MockRuntime;
pub(crate) use runtime::ContainerRuntime;
