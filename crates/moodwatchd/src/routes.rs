//! HTTP routes.

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moodwatch_core::EmotionLabel;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::pipeline::Pipeline;
use crate::store::{LogEntry, PermissionMap, Snapshot};

/// Name of the multipart field carrying the image.
const FRAME_FIELD: &str = "frame";

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Entries returned by `/emotion-logs`.
    pub recent_window: usize,
}

/// Build the API router with CORS open to any origin and request tracing.
pub fn create_router(state: AppState, max_frame_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(home))
        .route("/status", get(status))
        .route(
            "/detect-emotion",
            post(detect_emotion).layer(DefaultBodyLimit::max(max_frame_bytes)),
        )
        .route("/emotion-logs", get(emotion_logs))
        .route("/current-emotion", get(current_emotion))
        .route("/update-permissions", post(update_permissions))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn home() -> &'static str {
    "moodwatchd is running"
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let store = state.pipeline.store();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": true,
        "log_entries": store.len().await,
        "log_capacity": store.capacity(),
        "total_detections": store.total_recorded().await,
        "mail_enabled": state.pipeline.notifier().delivers(),
    }))
}

#[derive(Serialize)]
struct DetectResponse {
    emotion: EmotionLabel,
}

async fn detect_emotion(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| upload_error(e.status(), e.body_text()))?;
    let frame = read_frame(&mut multipart).await?;

    let detection = state.pipeline.detect(frame).await?;
    tracing::debug!(
        emotion = %detection.label,
        alerted = detection.alerted,
        "detect-emotion handled"
    );
    Ok(Json(DetectResponse {
        emotion: detection.label,
    }))
}

/// Keep the body-limit status; every other upload failure is a bad frame.
fn upload_error(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::InvalidImage(message)
    }
}

/// Pull the `frame` field out of the upload; other fields are skipped.
async fn read_frame(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e.status(), e.body_text()))?
    {
        if field.name() != Some(FRAME_FIELD) {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| upload_error(e.status(), e.body_text()))?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidImage("frame field is empty".into()));
        }
        return Ok(bytes.to_vec());
    }
    Err(ApiError::InvalidImage(format!("missing multipart field '{FRAME_FIELD}'")))
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<LogEntry>,
}

async fn emotion_logs(State(state): State<AppState>) -> Json<LogsResponse> {
    let logs = state.pipeline.store().recent_logs(state.recent_window).await;
    Json(LogsResponse { logs })
}

async fn current_emotion(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.pipeline.store().snapshot().await)
}

#[derive(Serialize)]
struct PermissionsResponse {
    status: &'static str,
    allowed: PermissionMap,
}

async fn update_permissions(
    State(state): State<AppState>,
    payload: Result<Json<PermissionMap>, JsonRejection>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let Json(allowed) = payload.map_err(|e| ApiError::MalformedPermissionPayload(e.body_text()))?;

    let allowed = state.pipeline.store().replace_permissions(allowed).await;
    tracing::info!(?allowed, "permissions replaced");

    Ok(Json(PermissionsResponse {
        status: "success",
        allowed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{engine_with_face, engine_without_face, png_frame};
    use crate::engine::EngineHandle;
    use crate::notifier::testing::RecordingNotifier;
    use crate::store::EmotionStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    const BOUNDARY: &str = "moodwatch-test-boundary";

    fn app(engine: EngineHandle) -> (Router, UnboundedReceiver<EmotionLabel>) {
        app_with_limit(engine, 1024 * 1024)
    }

    fn app_with_limit(
        engine: EngineHandle,
        max_frame_bytes: usize,
    ) -> (Router, UnboundedReceiver<EmotionLabel>) {
        let (notifier, rx) = RecordingNotifier::new(false);
        let store = Arc::new(EmotionStore::new(100));
        let pipeline = Pipeline::new(engine, store, Arc::new(notifier));
        let state = AppState {
            pipeline: Arc::new(pipeline),
            recent_window: 20,
        };
        (create_router(state, max_frame_bytes), rx)
    }

    fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        let head = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"frame.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        );
        body.extend_from_slice(head.as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn detect_request(field: &str, data: &[u8]) -> Request<Body> {
        Request::post("/detect-emotion")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(field, data)))
            .unwrap()
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn test_home_liveness() {
        let (app, _rx) = app(engine_without_face());
        let (status, body) = send(&app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("moodwatchd is running".into()));
    }

    #[tokio::test]
    async fn test_detect_sad_face() {
        let (app, mut rx) = app(engine_with_face(EmotionLabel::Sad));

        let (status, body) = send(&app, detect_request("frame", &png_frame())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"emotion": "Sad"}));

        let (_, logs) = send(&app, get("/emotion-logs")).await;
        assert_eq!(logs["logs"].as_array().unwrap().len(), 1);
        assert_eq!(logs["logs"][0]["emotion"], "Sad");
        assert!(logs["logs"][0]["timestamp"].as_str().unwrap().ends_with('Z'));

        let alert = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(alert, Some(EmotionLabel::Sad));
    }

    #[tokio::test]
    async fn test_detect_no_face() {
        let (app, _rx) = app(engine_without_face());

        let (status, body) = send(&app, detect_request("frame", &png_frame())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"emotion": "NoFace"}));

        let (_, current) = send(&app, get("/current-emotion")).await;
        assert_eq!(current["current"], "NoFace");
    }

    #[tokio::test]
    async fn test_detect_rejects_garbage_frame() {
        let (app, _rx) = app(engine_with_face(EmotionLabel::Happy));

        let (status, body) = send(&app, detect_request("frame", b"not an image at all")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE");

        let (_, logs) = send(&app, get("/emotion-logs")).await;
        assert_eq!(logs, json!({"logs": []}));
    }

    #[tokio::test]
    async fn test_detect_requires_frame_field() {
        let (app, _rx) = app(engine_with_face(EmotionLabel::Happy));
        let (status, body) = send(&app, detect_request("image", &png_frame())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE");
    }

    #[tokio::test]
    async fn test_detect_requires_multipart() {
        let (app, _rx) = app(engine_with_face(EmotionLabel::Happy));
        let (status, body) = send(&app, json_request("/detect-emotion", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE");
    }

    #[tokio::test]
    async fn test_detect_rejects_oversized_frame() {
        let (app, mut rx) = app_with_limit(engine_with_face(EmotionLabel::Sad), 64);

        let (status, body) = send(&app, detect_request("frame", &[0u8; 4096])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error_code"], "PAYLOAD_TOO_LARGE");

        let (_, logs) = send(&app, get("/emotion-logs")).await;
        assert_eq!(logs, json!({"logs": []}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let (app, _rx) = app(engine_without_face());
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/update-permissions")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_cors_header_on_simple_request() {
        let (app, _rx) = app(engine_without_face());
        let request = Request::get("/current-emotion")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_logs_window_is_last_twenty() {
        let (app, _rx) = app(engine_without_face());
        for _ in 0..25 {
            let (status, _) = send(&app, detect_request("frame", &png_frame())).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, logs) = send(&app, get("/emotion-logs")).await;
        assert_eq!(logs["logs"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_default_current_emotion() {
        let (app, _rx) = app(engine_without_face());
        let (status, body) = send(&app, get("/current-emotion")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"], "Neutral");
        let allowed = body["allowed"].as_object().unwrap();
        assert_eq!(allowed.len(), 7);
        assert!(allowed.values().all(|v| v == &Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_update_permissions_replaces_map() {
        let (app, _rx) = app(engine_without_face());

        let (status, body) = send(
            &app,
            json_request("/update-permissions", r#"{"Happy": true, "Angry": false}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "allowed": {"Happy": true, "Angry": false}})
        );

        let (_, current) = send(&app, get("/current-emotion")).await;
        assert_eq!(current["allowed"], json!({"Happy": true, "Angry": false}));
    }

    #[tokio::test]
    async fn test_update_permissions_rejects_malformed() {
        let (app, _rx) = app(engine_without_face());

        for body in [
            r#"["Happy"]"#,
            r#"{"Happy": "yes"}"#,
            r#"{"Bored": true}"#,
            r#"not json"#,
        ] {
            let (status, response) = send(&app, json_request("/update-permissions", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {body}");
            assert_eq!(response["error_code"], "MALFORMED_PERMISSION_PAYLOAD");
        }

        let (_, current) = send(&app, get("/current-emotion")).await;
        assert_eq!(current["allowed"].as_object().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_update_permissions_requires_json_content_type() {
        let (app, _rx) = app(engine_without_face());
        let request = Request::post("/update-permissions")
            .body(Body::from(r#"{"Happy": true}"#))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "MALFORMED_PERMISSION_PAYLOAD");
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let (app, _rx) = app(engine_without_face());
        send(&app, detect_request("frame", &png_frame())).await;

        let (status, body) = send(&app, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["log_entries"], 1);
        assert_eq!(body["total_detections"], 1);
        assert_eq!(body["mail_enabled"], true);
    }
}
