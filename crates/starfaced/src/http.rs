use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, Form, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use starface_core::{ClassifyError, DecodeError};
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

const NO_FACES_MESSAGE: &str = "No faces with two visible eyes were detected";

/// Shared handler state. `engine` is `None` when artifacts failed to load.
#[derive(Clone)]
pub struct AppState {
    engine: Option<EngineHandle>,
    load_error: Option<String>,
    artifacts_dir: PathBuf,
    timeout: Duration,
}

impl AppState {
    pub fn ready(engine: EngineHandle, artifacts_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            engine: Some(engine),
            load_error: None,
            artifacts_dir,
            timeout,
        }
    }

    pub fn degraded(load_error: String, artifacts_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            engine: None,
            load_error: Some(load_error),
            artifacts_dir,
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyForm {
    image_data: Option<String>,
}

pub fn router(state: AppState, max_request_bytes: usize, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/classes", get(classes))
        .route("/classify_image", post(classify_image))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Celebrity Face Recognition API is running!" }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let loaded = state.engine.is_some();
    let status = if loaded { "healthy" } else { "degraded" };
    let mut body = json!({
        "status": status,
        "model_loaded": loaded,
        "version": env!("CARGO_PKG_VERSION"),
        "artifacts_dir_exists": state.artifacts_dir.is_dir(),
    });
    if let Some(err) = &state.load_error {
        body["error"] = json!(err);
    }
    Json(body)
}

async fn classes(State(state): State<AppState>) -> Response {
    match &state.engine {
        Some(engine) => Json(json!({
            "success": true,
            "classes": engine.classes(),
            "count": engine.classes().len(),
        }))
        .into_response(),
        None => not_loaded(&state),
    }
}

async fn classify_image(
    State(state): State<AppState>,
    form: Result<Form<ClassifyForm>, FormRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("classify_image", %request_id);
    classify(state, form).instrument(span).await
}

async fn classify(state: AppState, form: Result<Form<ClassifyForm>, FormRejection>) -> Response {
    let image_data = match form {
        Ok(Form(form)) => form.image_data.filter(|s| !s.trim().is_empty()),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(%rejection, "request body too large");
            return failure(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload too large",
                &rejection.body_text(),
            );
        }
        Err(rejection) => {
            tracing::debug!(%rejection, "form not readable");
            None
        }
    };
    let Some(image_data) = image_data else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No image data provided" })),
        )
            .into_response();
    };
    let Some(engine) = &state.engine else {
        return not_loaded(&state);
    };

    tracing::info!(payload_len = image_data.len(), "classification requested");
    let results = match tokio::time::timeout(state.timeout, engine.classify(image_data)).await {
        Ok(Ok(results)) => results,
        Ok(Err(err)) => return engine_failure(err),
        Err(_) => {
            tracing::warn!(timeout_secs = state.timeout.as_secs(), "classification timed out");
            return failure(
                StatusCode::GATEWAY_TIMEOUT,
                "Request timed out",
                "Classification did not finish in time",
            );
        }
    };

    tracing::info!(faces = results.len(), "classification complete");
    if results.is_empty() {
        return Json(json!({
            "success": true,
            "faces_detected": 0,
            "results": [],
            "message": NO_FACES_MESSAGE,
        }))
        .into_response();
    }
    Json(json!({
        "success": true,
        "faces_detected": results.len(),
        "results": results,
    }))
    .into_response()
}

fn engine_failure(err: EngineError) -> Response {
    match err {
        EngineError::Classify(ClassifyError::Decode(err @ DecodeError::PayloadTooLarge { .. })) => {
            tracing::warn!(error = %err, "image rejected");
            failure(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large", &err.to_string())
        }
        EngineError::Classify(ClassifyError::Decode(err)) => {
            tracing::warn!(error = %err, "image rejected");
            failure(StatusCode::BAD_REQUEST, "Invalid image data", &err.to_string())
        }
        EngineError::Classify(ClassifyError::Processing(err)) => {
            tracing::error!(error = %err, "image processing failed");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Image processing failed",
                &err.to_string(),
            )
        }
        err => {
            tracing::error!(error = %err, "classification engine failure");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "An unexpected error occurred",
            )
        }
    }
}

fn not_loaded(state: &AppState) -> Response {
    let message = state.load_error.as_deref().unwrap_or("Model artifacts are not loaded");
    failure(StatusCode::SERVICE_UNAVAILABLE, "Model not loaded", message)
}

fn failure(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error, "message": message })),
    )
        .into_response()
}
