use predbench_common::{ErrorResponse, PredictError, PredictRequest, PredictResponse, Result};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub mod deadline;
pub use deadline::{CoalescerStats, DeadlineCoalescer, DeadlineToken};

/// The asynchronous call primitive the load generator drives.
///
/// `Ok(None)` means the service answered without a payload. Implementations
/// should stop waiting and return [`PredictError::Timeout`] once `deadline`
/// fires.
pub trait PredictClient: Send + Sync {
    fn predict(
        &self,
        request: PredictRequest,
        deadline: &DeadlineToken,
    ) -> impl Future<Output = Result<Option<PredictResponse>>> + Send;
}

/// Prediction client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target address (`host:port`).
    pub address: String,
    pub tcp_nodelay: bool,
    pub tcp_keepalive: Option<Duration>,
    /// Speak HTTP/2 without negotiation (h2c), multiplexing calls over few connections.
    pub http2_prior_knowledge: bool,
    pub pool_max_idle_per_host: usize,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(5)),
            http2_prior_knowledge: false,
            pool_max_idle_per_host: usize::MAX,
            connect_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Default connection settings aimed at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), ..Self::default() }
    }
}

/// HTTP prediction client
pub struct Client {
    pub config: ClientConfig,
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .tcp_nodelay(config.tcp_nodelay)
            .tcp_keepalive(config.tcp_keepalive)
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if config.http2_prior_knowledge {
            builder = builder.http2_prior_knowledge();
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| PredictError::NetworkError(e.to_string()))?;
        Ok(Self { config, http_client })
    }

    /// Build the predict URL for `model` against the configured address.
    pub fn build_predict_url(&self, model: &str) -> String {
        format!("http://{}/v1/models/{}/predict", self.config.address, model)
    }

    /// Send one request and wait for the answer with no deadline.
    pub async fn send(&self, request: &PredictRequest) -> Result<Option<PredictResponse>> {
        let url = self.build_predict_url(&request.model_spec.name);

        let response = self
            .http_client
            .post(&url)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| PredictError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(parse_error_response(status, response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PredictError::NetworkError(e.to_string()))?;
        if body.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice::<PredictResponse>(&body)
            .map(Some)
            .map_err(|e| PredictError::ProtocolError(e.to_string()))
    }
}

impl PredictClient for Client {
    async fn predict(
        &self,
        request: PredictRequest,
        deadline: &DeadlineToken,
    ) -> Result<Option<PredictResponse>> {
        tokio::select! {
            biased;
            _ = deadline.cancelled() => Err(PredictError::Timeout),
            result = self.send(&request) => result,
        }
    }
}

async fn parse_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> PredictError {
    let error_msg = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("Server returned status: {}", status));

    tracing::debug!(status = status.as_u16(), error = %error_msg, "predict call rejected");
    PredictError::HttpError(status.as_u16(), error_msg)
}
