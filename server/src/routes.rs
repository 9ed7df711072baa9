use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderName, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use gimbal_cam_capture::CaptureHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::actuator::PanTilt;
use crate::error::{AppError, Result};
use crate::pan::PanTiltCommand;
use crate::static_files;

const STATIC_PREFIX: &str = "/static/";
const X_FRAME_SEQ: HeaderName = HeaderName::from_static("x-frame-seq");
const ALLOW_GET: &str = "GET";
const ALLOW_GET_HEAD: &str = "GET, HEAD";

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub capture: CaptureHandle,
    pub actuator: Arc<dyn PanTilt>,
    pub static_dir: PathBuf,
    pub index_file: String,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// What a request path asks for. Checked in declaration order; the first
/// match wins, so `/static/...` never reaches the `/cam` prefix check.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Index,
    Static(&'a str),
    Pan,
    Camera,
    Health,
    NotFound,
}

impl<'a> Route<'a> {
    pub fn classify(path: &'a str) -> Self {
        if path == "/" {
            Route::Index
        } else if let Some(rest) = path.strip_prefix(STATIC_PREFIX) {
            Route::Static(rest)
        } else if path.starts_with("/pan") {
            Route::Pan
        } else if path.starts_with("/cam") {
            Route::Camera
        } else if path == "/health" {
            Route::Health
        } else {
            Route::NotFound
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Result<Response> {
    debug!(%method, path = uri.path(), "request");
    let route = Route::classify(uri.path());

    // HEAD is only answered where it has no side effects.
    let head_ok = route != Route::Pan;
    if method != Method::GET && !(method == Method::HEAD && head_ok) {
        let allow = if head_ok { ALLOW_GET_HEAD } else { ALLOW_GET };
        return Err(AppError::MethodNotAllowed(allow));
    }

    match route {
        Route::Index => static_files::serve(&state.static_dir, &state.index_file).await,
        Route::Static(rest) => static_files::serve(&state.static_dir, rest).await,
        Route::Pan => handle_pan(&state, &uri).await,
        Route::Camera => handle_camera(&state),
        Route::Health => Ok(handle_health(&state)),
        Route::NotFound => Err(AppError::NotFound(uri.path().to_string())),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /pan?pan=&tilt=: normalize, move pan then tilt, echo the values.
async fn handle_pan(state: &AppState, uri: &Uri) -> Result<Response> {
    let command = PanTiltCommand::parse(uri.path(), uri.query())
        .map_err(|e| AppError::BadRequest(e.to_string()))?
        .normalized();
    info!(pan = command.pan, tilt = command.tilt, "pan/tilt command");

    let actuator = Arc::clone(&state.actuator);
    tokio::task::spawn_blocking(move || {
        actuator.set_pan(command.pan)?;
        actuator.set_tilt(command.tilt)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(Html(command.ack_html()).into_response())
}

/// GET /cam*: the latest completed JPEG frame.
fn handle_camera(state: &AppState) -> Result<Response> {
    let frame = state.capture.current_frame().ok_or(AppError::NoFrame)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (X_FRAME_SEQ, frame.seq.to_string()),
        ],
        frame.bytes(),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct HealthReport {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    frame_seq: Option<u64>,
    frame_age_ms: Option<u64>,
}

/// GET /health: capture state plus freshness of the current frame.
fn handle_health(state: &AppState) -> Response {
    let capture = state.capture.state();
    let frame = state.capture.current_frame();
    let now_ms = Utc::now().timestamp_millis();

    let report = HealthReport {
        state: capture.as_str(),
        detail: capture.is_failed().then(|| capture.to_string()),
        frame_seq: frame.as_ref().map(|f| f.seq),
        frame_age_ms: frame.as_ref().map(|f| f.age_ms(now_ms)),
    };
    let status = if capture.is_failed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}
