//! HTTP server exposing the live gaze buffer.
//!
//! This module provides an HTTP server that:
//! - Renders the buffered gaze as a heat-map PNG via GET /current_heatmap.png
//! - Answers region checks via GET /check.json and GET /check_fixation.json
//! - Serves the experiment pages from a static directory, logging each view
//!
//! # Architecture
//!
//! ```text
//! Tracker ──→ ingestion ──→ FrameBuffer ──→ gaze-agent HTTP ──→ experiment page
//!                 ↓                                ↓
//!             record log  ←──── page views ────────┘
//! ```

use crate::config::{CheckConfig, Config, SharedCheckConfig};
use crate::core::buffer::SharedFrameBuffer;
use crate::core::fixation::detect_fixations;
use crate::core::heatmap::{encode_png, render_heatmap, Brush, HeatmapOptions, RenderError};
use crate::core::regions::{check_fixations, check_gaze, CheckResult};
use crate::recording::{append_record, PageViewRecord, SharedRecordSink};
use crate::tracker::stats::{IngestStatsSnapshot, SharedIngestStats};
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Directory served for every path without its own route
    pub static_dir: PathBuf,
    /// Check window when the request has no usable `delta_millisecond`
    pub default_window: Duration,
}

impl ServerConfig {
    /// Create a new server configuration bound to localhost.
    pub fn new(port: u16, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port,
            static_dir: static_dir.into(),
            default_window: Duration::from_millis(10_000),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            static_dir: config.static_dir.clone(),
            default_window: config.default_window,
        }
    }
}

/// Shared server state
pub struct ServerState {
    /// Live frame buffer (read only here)
    buffer: SharedFrameBuffer,
    /// Heat-map canvas size
    screen_width: u32,
    screen_height: u32,
    /// Brush image, loaded on first use
    brush_path: PathBuf,
    brush: Mutex<Option<Arc<Brush>>>,
    /// Targets and fixation parameters, swapped on reload
    check: SharedCheckConfig,
    /// Where page views are recorded
    sink: Option<SharedRecordSink>,
    stats: Option<SharedIngestStats>,
    default_window: Duration,
}

impl ServerState {
    /// Create new server state
    pub fn new(
        buffer: SharedFrameBuffer,
        screen_width: u32,
        screen_height: u32,
        brush_path: impl Into<PathBuf>,
        check: SharedCheckConfig,
    ) -> Self {
        Self {
            buffer,
            screen_width,
            screen_height,
            brush_path: brush_path.into(),
            brush: Mutex::new(None),
            check,
            sink: None,
            stats: None,
            default_window: Duration::from_millis(10_000),
        }
    }

    pub fn with_sink(mut self, sink: SharedRecordSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_stats(mut self, stats: SharedIngestStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Cached brush, loading it if no render has succeeded yet.
    fn brush(&self) -> Result<Arc<Brush>, RenderError> {
        let mut cached = self.brush.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(brush) = cached.as_ref() {
            return Ok(brush.clone());
        }
        let brush = Arc::new(Brush::load(&self.brush_path)?);
        *cached = Some(brush.clone());
        Ok(brush)
    }

    fn check_config(&self) -> CheckConfig {
        self.check
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start of the check window for a raw `delta_millisecond` value.
    fn window_start(&self, delta_millisecond: Option<&str>) -> chrono::DateTime<Utc> {
        let millis = delta_millisecond
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(self.default_window.as_millis() as i64);
        chrono::Duration::try_milliseconds(millis)
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .unwrap_or(if millis >= 0 {
                chrono::DateTime::<Utc>::MIN_UTC
            } else {
                chrono::DateTime::<Utc>::MAX_UTC
            })
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<IngestStatsSnapshot>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(code: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!(code, %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Query string of the check endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    /// Kept as text so that an unparsable value falls back to the default.
    pub delta_millisecond: Option<String>,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        buffered_frames: state.buffer.len(),
        buffer_capacity: state.buffer.capacity(),
        stats: state.stats.as_ref().map(|stats| stats.snapshot()),
    })
}

/// GET /current_heatmap.png
///
/// Renders everything currently buffered on a screen-sized canvas.
async fn current_heatmap(State(state): State<Arc<ServerState>>) -> Result<Response, ApiError> {
    let brush = state
        .brush()
        .map_err(|e| internal_error("BRUSH_ERROR", e))?;
    let frames = state.buffer.snapshot();
    let (width, height) = (state.screen_width, state.screen_height);

    let png = tokio::task::spawn_blocking(move || {
        let image = render_heatmap(&frames, &brush, &HeatmapOptions::new(width, height))?;
        encode_png(&image)
    })
    .await
    .map_err(|e| internal_error("RENDER_ERROR", e))?
    .map_err(|e| internal_error("RENDER_ERROR", e))?;

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("image/png"))],
        png,
    )
        .into_response())
}

/// GET /check.json?delta_millisecond=N
///
/// Whether any raw gaze sample in the window fell inside each target.
async fn check(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CheckQuery>,
) -> Json<CheckResult> {
    let since = state.window_start(query.delta_millisecond.as_deref());
    let targets = state.check_config().targets;
    let frames = state.buffer.snapshot();

    let result = check_gaze(&targets, &frames, since);
    tracing::debug!(?result, "gaze check");
    Json(result)
}

/// GET /check_fixation.json?delta_millisecond=N
///
/// Whether any fixation ending in the window fell inside each target.
async fn check_fixation(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CheckQuery>,
) -> Json<CheckResult> {
    let since = state.window_start(query.delta_millisecond.as_deref());
    let CheckConfig { fixation, targets } = state.check_config();
    let frames = state.buffer.snapshot();

    let fixations = detect_fixations(&frames, &fixation);
    let result = check_fixations(&targets, &fixations, since);
    tracing::debug!(?result, fixations = fixations.len(), "fixation check");
    Json(result)
}

/// Records a page view for every request reaching the static files.
async fn record_page_view(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(sink) = state.sink.as_deref() {
        let path = request
            .uri()
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        if let Err(e) = append_record(sink, &PageViewRecord::now(path)) {
            tracing::warn!(error = %e, path, "failed to record page view");
        }
    }
    next.run(request).await
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    state: ServerState,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState {
        default_window: config.default_window,
        ..state
    });

    let static_files = Router::new()
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            record_page_view,
        ));

    let app = Router::new()
        .route("/health", get(health))
        .route("/current_heatmap.png", get(current_heatmap))
        .route("/check.json", get(check))
        .route("/check_fixation.json", get(check_fixation))
        .merge(static_files)
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!(
        static_dir = %config.static_dir.display(),
        "gaze agent server listening on http://{}",
        actual_addr
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
