use crate::config::ApiConfig;
use crate::error::ServiceError;
use crate::request_handler::{Message, ReadParams, RequestHandler, TextDocument};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// File type served by the swagger route when none is given
pub const SWAGGER_FILE_TYPE: &str = "swagger";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub service_name: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusMsg {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/msapi/textfile", get(get_file_content).post(save_file_content))
        .route("/msapi/textfile/swagger", get(get_swagger_content))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(
            config.request_timeout(),
            enforce_deadline,
        ))
        .layer(cors)
        .with_state(state)
}

/// Answer with a 500 once a request runs past `deadline`
async fn enforce_deadline(
    State(deadline): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ServiceError::Timeout(deadline).into_response(),
    }
}

/// Health check endpoint, backed by a trivial storage round trip
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<StatusMsg>) {
    match state.handler.gateway().probe().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusMsg {
                status: "UP".to_string(),
                service_name: Some(state.service_name.clone()),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusMsg {
                    status: "DOWN".to_string(),
                    service_name: None,
                }),
            )
        }
    }
}

/// GET /msapi/textfile
async fn get_file_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReadParams>,
) -> Result<TextDocument, ServiceError> {
    state
        .handler
        .read(session_cookie(&headers), params, None)
        .await
}

/// GET /msapi/textfile/swagger
async fn get_swagger_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReadParams>,
) -> Result<TextDocument, ServiceError> {
    state
        .handler
        .read(session_cookie(&headers), params, Some(SWAGGER_FILE_TYPE))
        .await
}

/// POST /msapi/textfile
async fn save_file_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Message>, ServiceError> {
    let ack = state.handler.write(session_cookie(&headers), &body).await?;
    Ok(Json(ack))
}

impl IntoResponse for TextDocument {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, self.kind.mime_type())], self.text).into_response()
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting text file API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
