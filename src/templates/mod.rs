//! Embedded templates for the sandbox image and project config.

/// Default `sshbox.toml` configuration.
pub(crate) const SSHBOX_TOML: &str = include_str!("sshbox.toml");

/// Dockerfile for the sandbox image. Expects the `sshbox` binary and
/// `entrypoint.sh` next to it in the build context.
pub(crate) const DOCKERFILE: &str = include_str!("Dockerfile");

/// Sandbox bootstrap: user, password, sudo, sshd and the idle watcher.
pub(crate) const ENTRYPOINT_SH: &str = include_str!("entrypoint.sh");
