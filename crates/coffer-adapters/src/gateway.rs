use async_trait::async_trait;
use coffer_core::{GatewayError, PaymentRequest, SettlementGateway, SettlementStatus};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct InvoiceEnvelope {
    response: InvoiceBody,
}

#[derive(Debug, Deserialize)]
struct InvoiceBody {
    #[serde(default)]
    settled: bool,
}

/// Payment node client. Reads `GET {base}/invoice?payment_request=...` and
/// only consumes the `response.settled` flag.
#[derive(Clone)]
pub struct HttpSettlementGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpSettlementGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_token: Option<String>,
    ) -> Result<Self, GatewayError> {
        let client = crate::build_http_client(timeout).map_err(GatewayError::Transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            timeout,
        })
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn query_settlement(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<SettlementStatus, GatewayError> {
        let mut request = self
            .client
            .get(format!("{}/invoice", self.base_url))
            .query(&[("payment_request", payment_request.as_str())]);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout_ms())
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("status {status}: {body}")));
        }

        let envelope: InvoiceEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid invoice response: {e}")))?;
        debug!(payment_request = %payment_request, settled = envelope.response.settled, "settlement queried");
        Ok(SettlementStatus {
            settled: envelope.response.settled,
        })
    }
}

/// Gateway answering from a fixed set of settled payment requests.
#[derive(Default)]
pub struct StaticSettlementGateway {
    settled: RwLock<HashSet<String>>,
    queries: AtomicUsize,
}

impl StaticSettlementGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settle(&self, payment_request: &str) {
        if let Ok(mut settled) = self.settled.write() {
            settled.insert(payment_request.to_string());
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementGateway for StaticSettlementGateway {
    fn name(&self) -> &str {
        "static"
    }

    async fn query_settlement(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<SettlementStatus, GatewayError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let settled = self
            .settled
            .read()
            .map_err(|_| GatewayError::Transport("settled set lock poisoned".to_string()))?
            .contains(payment_request.as_str());
        Ok(SettlementStatus { settled })
    }
}

/// Wraps another gateway and fails every `fail_every`-th query.
pub struct FlakySettlementGateway<G> {
    inner: G,
    fail_every: usize,
    calls: AtomicUsize,
}

impl<G: SettlementGateway> FlakySettlementGateway<G> {
    pub fn new(inner: G, fail_every: usize) -> Self {
        Self {
            inner,
            fail_every: fail_every.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: SettlementGateway> SettlementGateway for FlakySettlementGateway<G> {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn query_settlement(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<SettlementStatus, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(GatewayError::Transport(format!(
                "injected failure on call {call}"
            )));
        }
        self.inner.query_settlement(payment_request).await
    }
}
