use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use portier_shared::protocol::{
    AuthResponse, CompletionReply, CompletionRequest, IpInfo, PasswordRequest,
};

use crate::client_ip::ClientIp;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gate::{AuthorizationGate, Decision};
use crate::gateway::CompletionGateway;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthorizationGate>,
    pub gateway: Arc<CompletionGateway>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth", get(auth_status).post(auth_submit))
        .route("/api/ip", get(client_ip_info))
        .route("/api/completion", post(completion))
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn auth_response(decision: Decision) -> (StatusCode, Json<AuthResponse>) {
    let status = match decision {
        Decision::Authorized(_) => StatusCode::OK,
        Decision::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Decision::CredentialsRequired | Decision::InvalidCredentials => StatusCode::UNAUTHORIZED,
        Decision::DurationRequired => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(AuthResponse {
            success: decision.is_authorized(),
            message: decision.message().to_string(),
            reason: decision.reason().to_string(),
        }),
    )
}

/// Status probe. Only a lockout is reported as an error status; a caller
/// who merely needs a password gets 200 with `success: false`.
async fn auth_status(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> (StatusCode, Json<AuthResponse>) {
    let decision = state.gate.check(ip).await;
    let (status, body) = auth_response(decision);
    if decision == Decision::RateLimited {
        (status, body)
    } else {
        (StatusCode::OK, body)
    }
}

async fn auth_submit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<PasswordRequest>,
) -> (StatusCode, Json<AuthResponse>) {
    match state.gate.submit(ip, &req.password).await {
        Ok(decision) => auth_response(decision),
        Err(e) => {
            tracing::error!(error = %e, "password check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AuthResponse {
                    success: false,
                    message: "Server configuration error".to_string(),
                    reason: "configuration".to_string(),
                }),
            )
        }
    }
}

async fn client_ip_info(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Json<IpInfo> {
    Json(IpInfo {
        ip: ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string()),
        is_ip_allowed: state.gate.is_ip_allowed(ip),
    })
}

async fn completion(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<CompletionRequest>,
) -> Result<Json<CompletionReply>, ServerError> {
    if !state.gate.allows(ip).await {
        return Err(ServerError::Unauthorized("Not authorized".into()));
    }
    let reply = state.gateway.complete(&req).await?;
    Ok(Json(reply))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
