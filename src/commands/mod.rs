//! CLI command implementations.
//!
//! Each submodule implements an sshbox subcommand, with the pure parts
//! kept apart from IO where that makes them testable.

pub mod image;
pub mod init;
pub mod serve;
pub mod watch;
