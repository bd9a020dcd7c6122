use anyhow::{Context, Result};
use async_trait::async_trait;

/// Answers "does the sandbox user have an SSH session right now?".
#[async_trait]
pub(crate) trait SessionProbe: Send + Sync {
    async fn has_active_session(&self) -> Result<bool>;
}

/// Looks for `sshd` processes owned by the user with `pgrep`.
#[derive(Debug, Clone)]
pub(crate) struct PgrepProbe {
    user: String,
}

impl PgrepProbe {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

#[async_trait]
impl SessionProbe for PgrepProbe {
    async fn has_active_session(&self) -> Result<bool> {
        let output = tokio::process::Command::new("pgrep")
            .args(["-u", &self.user, "sshd"])
            .output()
            .await
            .context("Failed to run pgrep")?;

        interpret_exit(output.status.code())
            .with_context(|| String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

/// pgrep exits 0 when something matched and 1 when nothing did.
fn interpret_exit(code: Option<i32>) -> Result<bool> {
    match code {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        Some(code) => anyhow::bail!("pgrep exited with status {code}"),
        None => anyhow::bail!("pgrep was terminated by a signal"),
    }
}
