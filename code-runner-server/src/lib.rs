use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use code_runner::{CodeExecutionService, ExecutionResult, ServiceStats, Status, SubmissionRequest, UsageRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Header carrying the caller's API key
pub const API_KEY_HEADER: &str = "x-api-key";
const ANONYMOUS: &str = "anonymous";
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Execution error: {0}")]
    ExecutionError(#[from] code_runner::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::ExecutionError(e) if e.is_rejection() => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
            }
            ServerError::ExecutionError(code_runner::Error::LoadShed) => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                Json(json!({ "error": code_runner::Error::LoadShed.to_string() })),
            )
                .into_response(),
            other => {
                error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub language: String,
    pub source: String,
    pub stdin: Option<String>,
    pub time_limit_ms: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

impl ExecuteRequest {
    fn into_submission(self, caller_id: String) -> SubmissionRequest {
        SubmissionRequest {
            language: self.language,
            source: self.source,
            stdin: self.stdin,
            time_limit_ms: self.time_limit_ms,
            memory_limit_bytes: self.memory_limit_bytes,
            caller_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub id: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
    pub available: bool,
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<CodeExecutionService>,
}

pub fn create_app(service: CodeExecutionService) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .route("/usage", get(usage))
        .route("/languages", get(languages))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code execution server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

async fn health_check() -> &'static str {
    "OK"
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecutionResult>), ServerError> {
    let request = payload.into_submission(caller_id(&headers));
    let result = state.service.execute(request).await?;

    let status = match result.status {
        Status::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

async fn usage(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UsageRecord>, ServerError> {
    let record = state.service.get_usage(&caller_id(&headers)).await?;
    Ok(Json(record))
}

async fn languages(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    let languages = state
        .service
        .registry()
        .languages()
        .map(|spec| LanguageInfo {
            id: spec.id.to_string(),
            aliases: spec.aliases.iter().map(|a| a.to_string()).collect(),
            compiled: spec.is_compiled(),
            available: spec.is_available(),
        })
        .collect();
    Json(languages)
}

async fn stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.service.stats())
}
