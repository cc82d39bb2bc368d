#![deny(unsafe_code)]

pub mod watcher;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, options, post};
use axum::{Json, Router};
use meza_adapters::{MockLedger, MockStkGateway};
use meza_core::{
    CustodyEngine, CustodyEngineConfig, CustodyError, CustodyPolicy, DepositRecord, DepositRequest,
    Keypair, LedgerClient, StkCallbackEnvelope, StkGateway, StoreConfig, UserRecord,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub policy: CustodyPolicy,
    /// Hex seed of the custody credential. Absent means an ephemeral keypair,
    /// acceptable for local runs only.
    pub custody_secret: Option<String>,
    pub callback_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            policy: CustodyPolicy::default(),
            custody_secret: None,
            callback_url: "http://127.0.0.1:8080/v1/deposits/callback".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<CustodyEngine>,
}

impl ServiceState {
    /// Bootstrap against the in-process ledger simulation and the accepting
    /// gateway stub. Production wiring injects real clients via
    /// [`ServiceState::bootstrap_with`].
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        Self::bootstrap_with(
            config,
            Arc::new(MockLedger::new()),
            Arc::new(MockStkGateway::new()),
        )
        .await
    }

    pub async fn bootstrap_with(
        config: ServiceConfig,
        ledger: Arc<dyn LedgerClient>,
        gateway: Arc<dyn StkGateway>,
    ) -> Result<Self, ServiceError> {
        let custody = match &config.custody_secret {
            Some(seed) => Keypair::from_secret_seed(seed)?,
            None => {
                warn!("no custody secret configured, generating an ephemeral keypair");
                Keypair::random()
            }
        };

        let store = meza_core::DocumentStore::bootstrap(config.store).await?;
        let engine = CustodyEngine::new(
            store,
            ledger,
            gateway,
            custody,
            CustodyEngineConfig {
                policy: config.policy,
                callback_url: config.callback_url,
            },
        );

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/deposits", post(initiate_deposit))
        .route("/v1/deposits", options(deposits_preflight))
        .route("/v1/deposits/callback", post(deposit_callback))
        .route("/v1/deposits/:deposit_id", get(get_deposit))
        .route("/v1/events/user-created", post(user_created))
        .layer(axum::middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// The deposit endpoints are called from browser clients; every response
/// carries a permissive origin header.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("custody core error: {0}")]
    Core(#[from] CustodyError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] CustodyError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            // Gateway declines keep the gateway's own response shape so
            // clients can surface the upstream description verbatim.
            ApiError::Core(CustodyError::GatewayRejected { code, description }) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "ResponseCode": code,
                    "ResponseDescription": description,
                })),
            )
                .into_response(),
            ApiError::Core(err) => {
                let status = match &err {
                    CustodyError::UserNotFound(_)
                    | CustodyError::GroupNotFound(_)
                    | CustodyError::EmptyGroup(_)
                    | CustodyError::Unprovisioned(_)
                    | CustodyError::InvalidCallback(_) => StatusCode::BAD_REQUEST,
                    CustodyError::DepositNotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    store_backend: &'static str,
    custody_key: String,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "meza-service",
        store_backend: state.engine.store().backend_label(),
        custody_key: state.engine.custody_public_key(),
    })
}

async fn initiate_deposit(
    State(state): State<ServiceState>,
    Json(request): Json<DepositRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state.engine.initiate_deposit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn deposits_preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
}

fn callback_ack() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

/// Gateway callback receiver.
///
/// The gateway retries on non-2xx, so only store faults (where a retry can
/// actually succeed) surface as errors. Anything else is logged and
/// acknowledged; the deposit record carries the real outcome.
async fn deposit_callback(
    State(state): State<ServiceState>,
    Json(envelope): Json<StkCallbackEnvelope>,
) -> Response {
    let callback = envelope.body.stk_callback;
    let deposit_id = callback.checkout_request_id.clone();

    match state.engine.handle_stk_callback(callback).await {
        Ok(_) => callback_ack().into_response(),
        Err(err @ (CustodyError::Store(_) | CustodyError::Serialization(_))) => {
            ApiError::Core(err).into_response()
        }
        Err(error) => {
            warn!(%deposit_id, %error, "gateway callback acknowledged without settlement");
            callback_ack().into_response()
        }
    }
}

async fn get_deposit(
    State(state): State<ServiceState>,
    Path(deposit_id): Path<String>,
) -> Result<Json<DepositRecord>, ApiError> {
    let record = state
        .engine
        .deposit(&deposit_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("deposit '{deposit_id}' not found")))?;
    Ok(Json(record))
}

#[derive(Debug, Clone, Deserialize)]
struct UserCreatedEvent {
    #[serde(rename = "userId")]
    user_id: String,
}

async fn user_created(
    State(state): State<ServiceState>,
    Json(event): Json<UserCreatedEvent>,
) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(state.engine.provision_user(&event.user_id).await?))
}
