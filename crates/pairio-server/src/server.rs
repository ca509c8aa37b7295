//! HTTP server for Pairio
//!
//! Every get/set is run through the admission engine before the store is
//! touched, and the ticket is handed back once the store call returns.
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `/get/:collection/:key` | GET, HEAD | `{"success":true,"value":..}` |
//! | `/set/:collection/:key/:value` | GET | `{"success":true}` |
//! | `/probe` | GET | `{"success":true}` after a fixed delay |
//! | `/health` | GET | status and version |
//! | `/stats` | GET | per-collection counters, only with `expose_stats` |
//!
//! `get` and `set` take `channel` and `signature` query parameters.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::storage::Storage;
use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use pairio_core::{
    AdmissionEngine, AdmissionTicket, ChannelSnapshot, Decision, OperationKind, RequestContext,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared server state
pub struct ServerState {
    pub engine: AdmissionEngine,
    pub storage: Storage,
    pub config: ServerConfig,
}

/// Pairio HTTP server
pub struct PairioServer {
    state: Arc<ServerState>,
}

impl PairioServer {
    pub fn new(engine: AdmissionEngine, storage: Storage, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(ServerState {
                engine,
                storage,
                config,
            }),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/probe", get(probe_handler))
            // Key/value; `get` also answers HEAD
            .route("/get/:collection/:key", get(get_handler))
            .route("/set/:collection/:key/:value", get(set_handler));
        if self.state.config.expose_stats {
            router = router.route("/stats", get(stats_handler));
        }

        router
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Pairio server listening on {}", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Authorize an operation and wait out a deferral or a penalty
async fn admit(
    state: &ServerState,
    method: &Method,
    operation: OperationKind,
    collection: &str,
    key: &str,
    value: Option<&str>,
    auth: &AuthParams,
) -> ServerResult<AdmissionTicket> {
    let ctx = RequestContext::new(method.as_str(), Utc::now());
    let decision = state.engine.authorize(
        operation,
        &auth.channel,
        collection,
        key,
        value,
        &auth.signature,
        &ctx,
    );

    match decision {
        Decision::Admitted(ticket) => Ok(ticket),
        Decision::Deferred(mut ticket) => {
            info!("Deferring {} task", operation);
            let wait = state.config.max_deferral_wait;
            match tokio::time::timeout(wait, ticket.wait_ready()).await {
                Ok(()) => {
                    info!("Starting deferred {}", operation);
                    Ok(ticket)
                }
                Err(_) => {
                    warn!(
                        "Deferred {} on {}/{} timed out after {:?}",
                        operation, auth.channel, collection, wait
                    );
                    Err(ServerError::DeferralTimeout(wait))
                }
            }
        }
        Decision::Rejected { reason, penalty } => {
            if let Some(penalty) = penalty {
                tokio::time::sleep(penalty).await;
            }
            Err(reason.into())
        }
    }
}

fn error_response(e: ServerError) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    info!("Responding with error: {} {}", status.as_u16(), e);
    (
        status,
        Json(ErrorResponse {
            success: false,
            error_code: e.error_code(),
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct AuthParams {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    signature: String,
}

#[derive(Serialize)]
struct GetResponse {
    success: bool,
    value: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error_code: u32,
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn probe_handler(State(state): State<Arc<ServerState>>) -> Json<SuccessResponse> {
    tokio::time::sleep(state.config.probe_delay).await;
    Json(SuccessResponse { success: true })
}

async fn stats_handler(State(state): State<Arc<ServerState>>) -> Json<Vec<ChannelSnapshot>> {
    Json(state.engine.snapshot())
}

async fn get_handler(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path((collection, key)): Path<(String, String)>,
    Query(auth): Query<AuthParams>,
) -> HandlerResult<GetResponse> {
    let ticket = admit(
        &state,
        &method,
        OperationKind::Read,
        &collection,
        &key,
        None,
        &auth,
    )
    .await
    .map_err(error_response)?;

    let result = state.storage.get(&collection, &key).await;
    state.engine.finalize(&auth.channel, ticket);

    match result {
        Ok(Some(value)) => Ok(Json(GetResponse {
            success: true,
            value,
        })),
        Ok(None) => Err(error_response(ServerError::KeyNotFound { collection, key })),
        Err(e) => Err(error_response(e.into())),
    }
}

async fn set_handler(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path((collection, key, value)): Path<(String, String, String)>,
    Query(auth): Query<AuthParams>,
) -> HandlerResult<SuccessResponse> {
    let ticket = admit(
        &state,
        &method,
        OperationKind::Write,
        &collection,
        &key,
        Some(&value),
        &auth,
    )
    .await
    .map_err(error_response)?;

    let result = state.storage.set(&collection, &key, &value).await;
    state.engine.finalize(&auth.channel, ticket);

    result
        .map(|()| Json(SuccessResponse { success: true }))
        .map_err(|e| error_response(e.into()))
}
