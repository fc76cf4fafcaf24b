use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use predbench_common::{ErrorResponse, PredictRequest, PredictResponse, MAX_REQUEST_SIZE};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod config;
pub mod fault;
use fault::{FaultPolicy, Reply};

/// Per-server call counters, updated atomically by every handler.
#[derive(Debug, Default)]
pub struct Counters {
    answered: AtomicU64,
    failed: AtomicU64,
    delayed: AtomicU64,
}

impl Counters {
    /// Calls that got a 200 or 204 answer.
    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    /// Calls failed by fault injection.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Calls that had latency injected.
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub policy: Arc<FaultPolicy>,
    pub counters: Arc<Counters>,
}

impl AppState {
    pub fn new(policy: FaultPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            counters: Arc::new(Counters::default()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub policy: FaultPolicy,
}

/// Local prediction server
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let state = AppState::new(config.policy.clone());
        Self { config, state }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Counters shared with the running handlers; stay readable after `run` consumes the server.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.state.counters)
    }

    /// Create the application router with the given state
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/v1/models/:model/predict", post(handle_predict))
            .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
            .with_state(state)
    }

    /// Run the server, signalling `ready_tx` with the bound address once accepting connections
    pub async fn run(self, ready_tx: tokio::sync::oneshot::Sender<SocketAddr>) -> Result<(), Box<dyn std::error::Error>> {
        let app = Self::create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.config.address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, policy = ?self.config.policy, "prediction server bound");
        ready_tx.send(local_addr).ok();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

/// Handler for POST /v1/models/:model/predict: echoes the inputs back as outputs,
/// after applying the fault policy.
pub async fn handle_predict(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(request): Json<PredictRequest>,
) -> Response {
    if request.model_spec.name != model {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Model {:?} in body does not match {:?} in path", request.model_spec.name, model),
        );
    }

    let action = {
        let mut rng = rand::thread_rng();
        state.policy.decide(rng.gen(), rng.gen())
    };

    if let Some(delay) = action.delay {
        state.counters.delayed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?delay, "injecting latency");
        tokio::time::sleep(delay).await;
    }

    match action.reply {
        Reply::Fail => {
            state.counters.failed.fetch_add(1, Ordering::Relaxed);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Injected failure")
        }
        Reply::Empty => {
            state.counters.answered.fetch_add(1, Ordering::Relaxed);
            StatusCode::NO_CONTENT.into_response()
        }
        Reply::Respond => {
            state.counters.answered.fetch_add(1, Ordering::Relaxed);
            Json(PredictResponse { model_spec: request.model_spec, outputs: request.inputs }).into_response()
        }
    }
}
