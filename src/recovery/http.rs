//! Recovery collaborator reached over HTTP

use super::TransactionRecovery;
use crate::error::{TccError, TccResult};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Drives the transaction-log service's recovery endpoints.
///
/// `401`/`403` answers mean this node is not entitled to the pass.
pub struct HttpTransactionRecovery {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpTransactionRecovery {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> TccResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint
                .map(|e| e.trim().trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
        })
    }

    fn url(&self, pass: &str) -> TccResult<String> {
        match &self.endpoint {
            Some(endpoint) => Ok(format!("{}/recovery/{}", endpoint, pass)),
            None => Err(TccError::not_authorized(format!(
                "{} recovery (no recovery endpoint configured)",
                pass
            ))),
        }
    }

    async fn post(&self, pass: &str) -> TccResult<()> {
        let url = self.url(pass)?;
        let response = self.client.post(&url).send().await?;
        let status = response.status();
        debug!("Recovery pass {} answered {}", pass, status);
        classify(pass, status)
    }
}

fn classify(pass: &str, status: StatusCode) -> TccResult<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(TccError::not_authorized(format!("{} recovery", pass)))
        }
        s => Err(TccError::Recovery(format!(
            "{} recovery answered {}",
            pass, s
        ))),
    }
}

#[async_trait]
impl TransactionRecovery for HttpTransactionRecovery {
    async fn start_recovery(&self) -> TccResult<()> {
        self.post("start").await
    }

    async fn timing_recover(&self) -> TccResult<()> {
        self.post("timing").await
    }

    async fn branch_recover(&self) -> TccResult<()> {
        self.post("branch").await
    }
}
