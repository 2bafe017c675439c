use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::analytics::{PipelineControl, PipelineStatus};
use crate::buffer::FrameSlot;
use crate::Assets;
use crate::storage::{DetectionHistory, DetectionRecord};

use super::mjpeg::{self, ClientStream};

#[derive(Clone)]
pub struct AppState {
    pub history: DetectionHistory,
    pub frames: FrameSlot,
    pub control: PipelineControl,
    pub categories: Arc<Vec<String>>,
    next_client: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        history: DetectionHistory,
        frames: FrameSlot,
        control: PipelineControl,
        categories: Vec<String>,
    ) -> Self {
        Self {
            history,
            frames,
            control,
            categories: Arc::new(categories),
            next_client: Arc::new(AtomicUsize::new(1)),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: PipelineStatus,
    clients: usize,
    frames_published: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(static_handler))
        .route("/video_feed", get(video_feed_handler))
        .route("/inference_data", get(inference_data_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/status", get(status_handler))
        .route("/api/pipeline/pause", post(pause_handler))
        .route("/api/pipeline/resume", post(resume_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve until the pipeline shuts down. Open `/video_feed` streams end on
/// the same signal, so shutdown does not wait on connected viewers.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> Result<(), std::io::Error> {
    let control = state.control.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { control.wait_for_shutdown().await })
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn video_feed_handler(State(state): State<AppState>) -> Response {
    let id = state.next_client.fetch_add(1, Ordering::Relaxed);
    let client = ClientStream::connect(&state.frames, &state.control, id);

    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        Body::from_stream(client.into_stream()),
    )
        .into_response()
}

async fn inference_data_handler(State(state): State<AppState>) -> Json<Vec<DetectionRecord>> {
    Json(state.history.records())
}

async fn categories_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.categories.as_ref().clone())
}

fn status_response(state: &AppState) -> StatusResponse {
    StatusResponse {
        status: state.control.status(),
        clients: state.frames.client_count(),
        frames_published: state.frames.published(),
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(status_response(&state))
}

async fn pause_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.control.pause();
    tracing::info!("pipeline pause requested");
    (StatusCode::ACCEPTED, Json(status_response(&state)))
}

async fn resume_handler(State(state): State<AppState>) -> impl IntoResponse {
    if !state.control.can_resume() {
        return (StatusCode::CONFLICT, Json(status_response(&state))).into_response();
    }
    state.control.resume();
    tracing::info!("pipeline resume requested");
    (StatusCode::ACCEPTED, Json(status_response(&state))).into_response()
}
