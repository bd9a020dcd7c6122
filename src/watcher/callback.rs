use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// How a removal request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReclaimOutcome {
    /// The control API removed the sandbox.
    Removed,
    /// The sandbox was already gone (e.g. removed by an operator).
    AlreadyGone,
    /// The request failed; it is not retried.
    Failed(String),
}

/// Asks the control plane to remove a sandbox.
#[async_trait]
pub(crate) trait Reclaimer: Send + Sync {
    async fn reclaim(&self, name: &str) -> ReclaimOutcome;
}

/// Sends `DELETE <base_url>/<name>` to the control API.
#[derive(Debug, Clone)]
pub(crate) struct HttpReclaimer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReclaimer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

#[async_trait]
impl Reclaimer for HttpReclaimer {
    #[allow(tail_expr_drop_order)] // Drop order changes are harmless for HTTP responses
    async fn reclaim(&self, name: &str) -> ReclaimOutcome {
        let url = self.url_for(name);
        debug!("Sending removal request to {}", url);

        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => ReclaimOutcome::Removed,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                ReclaimOutcome::AlreadyGone
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                ReclaimOutcome::Failed(format!("removal returned {status}: {body}"))
            }
            Err(e) => ReclaimOutcome::Failed(e.to_string()),
        }
    }
}
