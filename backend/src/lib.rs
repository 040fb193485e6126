use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

mod config;
mod connection;
mod gateway;
mod logging;
mod pages;
mod protocol;
mod registry;
mod room;

pub use config::Config;
pub use connection::{dispatch, handle_socket};
pub use gateway::{broadcast, Connection, ConnectionId};
pub use logging::init_logging;
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{RoomHandle, RoomRegistry};
pub use room::{Room, RoomCommand, RoomError, RoomFlow};

#[derive(Clone)]
pub struct AppState {
    pub(crate) registry: RoomRegistry,
    pub(crate) config: Arc<Config>,
    started_at: DateTime<Utc>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = match config.vote_seed {
            Some(seed) => RoomRegistry::with_seed(seed),
            None => RoomRegistry::default(),
        };
        Self {
            registry,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/log", get(log_endpoint).post(log_endpoint))
        .fallback(not_found)
        .layer(middleware::from_fn(access_log_and_cors))
        .with_state(state)
}

async fn access_log_and_cors(request: Request, next: Next) -> Response {
    info!(
        method = %request.method(),
        uri = %request.uri(),
        agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
        "http request"
    );

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Serves WebSocket upgrades and, for plain browser requests, the status page.
async fn index(ws: Option<WebSocketUpgrade>, State(state): State<AppState>) -> Response {
    match ws {
        Some(ws) => upgrade(ws, state),
        None => {
            let rooms = state.registry.len().await;
            Html(pages::status_page(state.started_at, rooms)).into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Page not found")
}

#[derive(Deserialize)]
struct LogParams {
    action: Option<String>,
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    message: String,
}

async fn log_endpoint(
    method: Method,
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Response {
    let path = state.config.log_file.as_path();
    match params.action.as_deref() {
        Some("clear") if method == Method::POST => clear_log(path).await,
        Some("download") => download_log(path).await,
        _ => view_log(path).await,
    }
}

async fn view_log(path: &Path) -> Response {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(text) => Some(text),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            error!(%err, path = %path.display(), "failed to read log file");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("internal server error: {err}"),
            )
                .into_response();
        }
    };
    let size = content.as_ref().map(|text| text.len() as u64).unwrap_or(0);
    let page = pages::log_page(content.as_deref(), size, Utc::now());

    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")],
        Html(page),
    )
        .into_response()
}

async fn download_log(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let disposition = format!(
                "attachment; filename=\"relay-server-{}.log\"",
                Utc::now().format("%Y-%m-%d")
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "log file not found").into_response()
        }
        Err(err) => {
            error!(%err, "failed to read log file for download");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to download log: {err}"),
            )
                .into_response()
        }
    }
}

async fn clear_log(path: &Path) -> Response {
    match tokio::fs::write(path, "").await {
        Ok(()) => {
            info!("log file cleared");
            Json(ClearResponse {
                success: true,
                message: "log cleared".to_string(),
            })
            .into_response()
        }
        Err(err) => {
            error!(%err, "failed to clear log file");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ClearResponse {
                    success: false,
                    message: format!("failed to clear log: {err}"),
                }),
            )
                .into_response()
        }
    }
}
