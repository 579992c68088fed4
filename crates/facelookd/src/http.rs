//! HTTP routes: upload page, single-image recognition and status.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facelook_core::types::FaceReport;
use facelook_core::ReferenceDatabase;
use serde::Serialize;
use std::sync::Arc;

const INDEX_HTML: &str = include_str!("../static/index.html");
const UPLOAD_FIELD: &str = "image";

/// Daemon status reported by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub version: &'static str,
    pub entries: usize,
    pub labels: Vec<String>,
    pub detector: &'static str,
}

impl StatusInfo {
    pub fn new(database: &ReferenceDatabase, detector: &'static str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            entries: database.len(),
            labels: database.labels().map(str::to_owned).collect(),
            detector,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub status: Arc<StatusInfo>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(state): State<AppState>) -> Json<StatusInfo> {
    Json(state.status.as_ref().clone())
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Ok(mut multipart) = multipart else {
        return error(StatusCode::BAD_REQUEST, "No file uploaded");
    };

    // Only a field named "image" that carries a filename counts as a file.
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return error(StatusCode::BAD_REQUEST, "No file uploaded"),
            Err(e) => {
                tracing::warn!(error = %e, "malformed multipart body");
                return error(e.status(), "Malformed upload");
            }
        };
        if field.name() == Some(UPLOAD_FIELD) && field.file_name().is_some() {
            return recognize_upload(&state, field).await;
        }
    }
}

async fn recognize_upload(state: &AppState, field: Field<'_>) -> Response {
    let file_name = field.file_name().unwrap_or_default().to_string();
    if file_name.is_empty() {
        return error(StatusCode::BAD_REQUEST, "No selected file");
    }

    let bytes = match field.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, file = %file_name, "failed to read upload");
            return error(e.status(), "Malformed upload");
        }
    };

    tracing::info!(file = %file_name, bytes = bytes.len(), "upload received");

    match state.engine.recognize(bytes.to_vec()).await {
        Ok(results) => {
            let reports: Vec<FaceReport> = results.iter().map(|r| r.to_report()).collect();
            tracing::info!(file = %file_name, faces = reports.len(), "upload recognized");
            Json(reports).into_response()
        }
        Err(EngineError::Decode(e)) => {
            tracing::info!(file = %file_name, error = %e, "upload is not a decodable image");
            error(StatusCode::BAD_REQUEST, "Could not decode image")
        }
        Err(e) => {
            tracing::error!(file = %file_name, error = %e, "recognition failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Recognition failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use axum::body::Body;
    use axum::http::Request;
    use facelook_core::detector::DetectorError;
    use facelook_core::{Detection, FaceDetector, Recognizer, ReferenceEntry, RelativeBox};
    use image::{Rgb, RgbImage};
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facelook-test-boundary";

    /// One face on the left half of every image.
    struct LeftHalf;

    impl FaceDetector for LeftHalf {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![Detection {
                bbox: RelativeBox { xmin: 0.0, ymin: 0.0, width: 0.5, height: 1.0 },
                confidence: 0.9,
            }])
        }
    }

    fn red_face_png() -> Vec<u8> {
        let img = RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        png
    }

    /// Inference always fails.
    struct Broken;

    impl FaceDetector for Broken {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Err(DetectorError::InferenceFailed("no output tensor".into()))
        }
    }

    fn app(database: ReferenceDatabase) -> Router {
        app_with(LeftHalf, database)
    }

    fn app_with<D>(detector: D, database: ReferenceDatabase) -> Router
    where
        D: FaceDetector + Send + 'static,
    {
        let status = Arc::new(StatusInfo::new(&database, "test"));
        let engine = spawn_engine(Recognizer::new(detector, database)).unwrap();
        router(AppState { engine, status }, 1024 * 1024)
    }

    fn red_database() -> ReferenceDatabase {
        let mut detector = LeftHalf;
        let img = image::load_from_memory(&red_face_png()).unwrap().to_rgb8();
        let crop = facelook_core::extractor::extract(&mut detector, &img).unwrap().unwrap();
        ReferenceDatabase::new(vec![ReferenceEntry { label: "red".into(), crop }])
    }

    fn multipart_part(name: &str, file_name: Option<&str>, content: &[u8]) -> Vec<u8> {
        let mut part = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"");
        if let Some(f) = file_name {
            part.push_str(&format!("; filename=\"{f}\"\r\nContent-Type: application/octet-stream"));
        }
        part.push_str("\r\n\r\n");
        let mut bytes = part.into_bytes();
        bytes.extend_from_slice(content);
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    fn upload_request(parts: Vec<Vec<u8>>) -> Request<Body> {
        let mut body: Vec<u8> = parts.concat();
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_upload_without_image_field() {
        let request = upload_request(vec![multipart_part("other", Some("a.png"), b"x")]);
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": "No file uploaded" }));
    }

    #[tokio::test]
    async fn test_upload_image_as_plain_form_field() {
        let request = upload_request(vec![multipart_part("image", None, b"not a file")]);
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_upload_not_multipart() {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_upload_empty_filename() {
        let request = upload_request(vec![multipart_part("image", Some(""), b"")]);
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": "No selected file" }));
    }

    #[tokio::test]
    async fn test_upload_undecodable() {
        let request = upload_request(vec![multipart_part("image", Some("a.jpg"), b"garbage")]);
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Could not decode image");
    }

    #[tokio::test]
    async fn test_upload_recognizes_known_face() {
        let request = upload_request(vec![
            multipart_part("note", None, b"hello"),
            multipart_part("image", Some("red.png"), &red_face_png()),
        ]);
        let (status, body) = send(app(red_database()), request).await;

        assert_eq!(status, StatusCode::OK);
        let faces = body.as_array().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0]["label"], "red");
        assert_eq!(faces[0]["x"], 0);
        assert_eq!(faces[0]["y"], 0);
        assert_eq!(faces[0]["width"], 20);
        assert_eq!(faces[0]["height"], 20);
        assert!((faces[0]["confidence"].as_f64().unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upload_empty_database_reports_null_confidence() {
        let part = multipart_part("image", Some("red.png"), &red_face_png());
        let request = upload_request(vec![part]);
        let (status, body) = send(app(ReferenceDatabase::default()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["label"], "Unknown");
        assert!(body[0]["confidence"].is_null());
    }

    #[tokio::test]
    async fn test_upload_detector_failure_is_opaque_500() {
        let part = multipart_part("image", Some("red.png"), &red_face_png());
        let request = upload_request(vec![part]);
        let (status, body) = send(app_with(Broken, red_database()), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({ "error": "Recognition failed" }));
    }

    #[tokio::test]
    async fn test_index_and_status() {
        let app = app(red_database());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(std::str::from_utf8(&html).unwrap().contains("/upload"));

        let request = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], 1);
        assert_eq!(body["labels"], serde_json::json!(["red"]));
    }
}
