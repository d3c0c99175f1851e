//! Remote participant handle and the transport it dispatches over

use super::{NodeIdentifier, RemoteAddr};
use crate::error::{TccError, TccResult};
use crate::invocation::ContextId;
use crate::propagation::PropagationCodec;
use crate::routing::{AffinityRouter, AffinityTable, ServerList};
use crate::transaction::TransactionXid;

use async_trait::async_trait;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Second-phase operations a remote compensable service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantOperation {
    Confirm,
    Cancel,
    Forget,
    Recover,
}

impl ParticipantOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantOperation::Confirm => "confirm",
            ParticipantOperation::Cancel => "cancel",
            ParticipantOperation::Forget => "forget",
            ParticipantOperation::Recover => "recover",
        }
    }
}

/// One call to a remote participant
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRequest {
    pub context: ContextId,
    pub application: String,
    /// Exact instance to call; `None` lets the router pick one.
    pub address: Option<RemoteAddr>,
    pub operation: ParticipantOperation,
    pub xid: Option<TransactionXid>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantTransport: Send + Sync {
    async fn send(&self, request: ParticipantRequest) -> TccResult<serde_json::Value>;
}

/// A remote compensable service endpoint
#[async_trait]
pub trait RemoteCoordinator: Send + Sync {
    fn identifier(&self) -> &str;

    fn application(&self) -> &str;

    async fn confirm(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()>;

    async fn cancel(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()>;

    async fn forget(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()>;

    /// Transactions the participant still holds in-doubt
    async fn recover(&self, ctx: ContextId) -> TccResult<Vec<TransactionXid>>;
}

/// Handle bound to a node identifier.
///
/// Stateful handles always call the identifier's own address; stateless
/// handles address the application and leave instance choice to routing.
/// A stateless handle releases its transaction's affinity once a
/// second-phase call has succeeded.
pub struct RemoteParticipant {
    identifier: NodeIdentifier,
    stateful: bool,
    transport: Arc<dyn ParticipantTransport>,
    affinities: Arc<AffinityTable>,
}

impl RemoteParticipant {
    pub fn new(
        identifier: NodeIdentifier,
        stateful: bool,
        transport: Arc<dyn ParticipantTransport>,
        affinities: Arc<AffinityTable>,
    ) -> Self {
        Self {
            identifier,
            stateful,
            transport,
            affinities,
        }
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn node(&self) -> &NodeIdentifier {
        &self.identifier
    }

    async fn invoke(
        &self,
        ctx: ContextId,
        operation: ParticipantOperation,
        xid: Option<&TransactionXid>,
    ) -> TccResult<serde_json::Value> {
        let request = ParticipantRequest {
            context: ctx,
            application: self.identifier.application().to_string(),
            address: self.stateful.then(|| self.identifier.remote_addr()),
            operation,
            xid: xid.copied(),
        };
        self.transport.send(request).await
    }

    async fn complete(
        &self,
        ctx: ContextId,
        operation: ParticipantOperation,
        xid: &TransactionXid,
    ) -> TccResult<()> {
        self.invoke(ctx, operation, Some(xid)).await?;
        if !self.stateful
            && self
                .affinities
                .release(xid, self.identifier.application())
                .is_some()
        {
            debug!(
                "Released affinity of {} for {} after {}",
                xid,
                self.identifier.application(),
                operation.as_str()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCoordinator for RemoteParticipant {
    fn identifier(&self) -> &str {
        self.identifier.as_str()
    }

    fn application(&self) -> &str {
        self.identifier.application()
    }

    async fn confirm(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()> {
        self.complete(ctx, ParticipantOperation::Confirm, xid).await
    }

    async fn cancel(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()> {
        self.complete(ctx, ParticipantOperation::Cancel, xid).await
    }

    async fn forget(&self, ctx: ContextId, xid: &TransactionXid) -> TccResult<()> {
        self.complete(ctx, ParticipantOperation::Forget, xid).await
    }

    async fn recover(&self, ctx: ContextId) -> TccResult<Vec<TransactionXid>> {
        let body = self.invoke(ctx, ParticipantOperation::Recover, None).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(body)?)
    }
}

/// Sends participant calls over HTTP, carrying the propagation headers
pub struct HttpParticipantTransport {
    client: reqwest::Client,
    scheme: String,
    router: Arc<AffinityRouter>,
    servers: Arc<dyn ServerList>,
    codec: Arc<PropagationCodec>,
}

impl HttpParticipantTransport {
    pub fn new(
        scheme: impl Into<String>,
        timeout: Duration,
        router: Arc<AffinityRouter>,
        servers: Arc<dyn ServerList>,
        codec: Arc<PropagationCodec>,
    ) -> TccResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            scheme: scheme.into(),
            router,
            servers,
            codec,
        })
    }

    fn target(&self, request: &ParticipantRequest) -> TccResult<RemoteAddr> {
        if let Some(address) = &request.address {
            return Ok(address.clone());
        }

        let chosen = match &request.xid {
            Some(xid) => self.router.choose_in_transaction(
                request.context,
                xid,
                &request.application,
                None,
                self.servers.as_ref(),
            ),
            None => self.router.choose_for(
                request.context,
                &request.application,
                None,
                self.servers.as_ref(),
            ),
        };
        chosen
            .map(|server| RemoteAddr {
                host: server.host,
                port: server.port,
            })
            .ok_or_else(|| TccError::NoServerAvailable {
                service: request.application.clone(),
            })
    }
}

/// `{scheme}://{host}:{port}/tcc/{operation}[/{global}[/{branch}]]`
fn request_url(scheme: &str, target: &RemoteAddr, request: &ParticipantRequest) -> String {
    let mut url = format!(
        "{}://{}:{}/tcc/{}",
        scheme,
        target.host,
        target.port,
        request.operation.as_str()
    );
    if let Some(xid) = &request.xid {
        url.push('/');
        url.push_str(&xid.global_id.simple().to_string());
        if let Some(branch) = xid.branch_qualifier {
            url.push('/');
            url.push_str(&branch.simple().to_string());
        }
    }
    url
}

#[async_trait]
impl ParticipantTransport for HttpParticipantTransport {
    async fn send(&self, request: ParticipantRequest) -> TccResult<serde_json::Value> {
        let target = self.target(&request)?;
        let url = request_url(&self.scheme, &target, &request);

        let mut headers = HeaderMap::new();
        self.codec.apply(request.context, &mut headers)?;

        debug!("Calling {} on {}", request.operation.as_str(), url);
        let response = self.client.post(&url).headers(headers).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TccError::Transport {
                target: target.to_string(),
                operation: request.operation.as_str().to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}
