//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Errors surfaced by the sandbox lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A sandbox with this name already exists or is being created.
    #[error("Container already exists: {name}")]
    AlreadyExists { name: String },

    /// Every port in the pool is bound.
    #[error("No free SSH ports available")]
    NoFreePort,

    /// The sandbox image could not be made available.
    #[error("Failed to pull image {image}: {message}")]
    ImagePullFailure { image: String, message: String },

    /// The sandbox was created but did not start.
    #[error("Failed to start container {name}: {message}")]
    StartFailure { name: String, message: String },

    /// No sandbox by this name or id.
    #[error("Container not found: {name}")]
    NotFound { name: String },

    /// The request itself is malformed (bad name, bad credentials).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Uncategorized container runtime failure.
    #[error("Container runtime error: {message}")]
    Runtime { message: String },
}

impl SandboxError {
    /// Creates an `AlreadyExists` error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Creates an `ImagePullFailure` error.
    pub fn image_pull_failure(image: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImagePullFailure {
            image: image.into(),
            message: message.into(),
        }
    }

    /// Creates an `ImagePullFailure` for a pull that exceeded its bound.
    pub fn image_pull_timeout(image: impl Into<String>, timeout: Duration) -> Self {
        Self::image_pull_failure(
            image,
            format!("timed out after {} seconds", timeout.as_secs()),
        )
    }

    /// Creates a `StartFailure` error.
    pub fn start_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StartFailure {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a `StartFailure` for a start that exceeded its bound.
    pub fn start_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        Self::start_failure(
            name,
            format!("timed out after {} seconds", timeout.as_secs()),
        )
    }

    /// Creates a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an `InvalidRequest` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a `Runtime` error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "already_exists",
            Self::NoFreePort => "no_free_port",
            Self::ImagePullFailure { .. } => "image_pull_failure",
            Self::StartFailure { .. } => "start_failure",
            Self::NotFound { .. } => "not_found",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Runtime { .. } => "runtime_error",
        }
    }

    /// Returns true if this is an already-exists error.
    #[cfg(test)]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if the port pool was exhausted.
    #[cfg(test)]
    pub fn is_no_free_port(&self) -> bool {
        matches!(self, Self::NoFreePort)
    }

    /// Returns true if this is a not-found error.
    #[cfg(test)]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_error() {
        let err = SandboxError::already_exists("alice");
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Container already exists: alice");
        assert_eq!(err.kind(), "already_exists");
    }

    #[test]
    fn test_no_free_port_error() {
        let err = SandboxError::NoFreePort;
        assert!(err.is_no_free_port());
        assert_eq!(err.to_string(), "No free SSH ports available");
    }

    #[test]
    fn test_image_pull_timeout_error() {
        let err = SandboxError::image_pull_timeout("ubuntu:22.04", Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "Failed to pull image ubuntu:22.04: timed out after 300 seconds"
        );
        assert_eq!(err.kind(), "image_pull_failure");
    }

    #[test]
    fn test_start_failure_error() {
        let err = SandboxError::start_failure("bob", "port is already allocated");
        assert_eq!(
            err.to_string(),
            "Failed to start container bob: port is already allocated"
        );
        assert_eq!(err.kind(), "start_failure");
    }

    #[test]
    fn test_not_found_error() {
        let err = SandboxError::not_found("ghost");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Container not found: ghost");
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let kinds = [
            SandboxError::already_exists("a").kind(),
            SandboxError::NoFreePort.kind(),
            SandboxError::image_pull_failure("i", "m").kind(),
            SandboxError::start_failure("n", "m").kind(),
            SandboxError::not_found("n").kind(),
            SandboxError::invalid_request("m").kind(),
            SandboxError::runtime("m").kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
