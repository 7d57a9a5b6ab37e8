//! HTTP API for vidshrink
//!
//! JSON routes over a shared [`Library`]. Requests are logged through a
//! trace layer and CORS is permissive.

use crate::library::{Library, LibraryError, ProcessSummary, ScanSummary};
use crate::record::FileRecord;
use crate::store::{Setting, StoreStats};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mime_guess::mime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Failure of a request, as an HTTP response
#[derive(Debug)]
pub enum ApiError {
    /// The library operation failed
    Library(LibraryError),
    /// The request itself was unusable
    Request { status: StatusCode, message: String },
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        ApiError::Library(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Request {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Library(e @ LibraryError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Library(e) => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Request { status, message } => (status, message),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: ScanSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: ProcessSummary,
}

#[derive(Debug, Deserialize)]
pub struct ProcessSingleRequest {
    pub file_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessSingleResponse {
    pub message: String,
    pub file: FileRecord,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// GET /files
async fn list_files(State(library): State<Library>) -> ApiResult<Vec<FileRecord>> {
    Ok(Json(library.list_files().await?))
}

/// GET /files/check
async fn check_files(State(library): State<Library>) -> ApiResult<Vec<FileRecord>> {
    Ok(Json(library.check().await?))
}

/// POST /files/scan
///
/// An empty body scans the library root. A non-empty body must be a JSON
/// object; a wrong content type or shape is rejected.
async fn scan_files(
    State(library): State<Library>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ScanResponse> {
    let request = parse_scan_request(&headers, &body)?;
    let dir = request.directory.map(PathBuf::from);
    let summary = library.scan(dir.as_deref()).await?;
    Ok(Json(ScanResponse {
        message: "Scan completed".to_string(),
        summary,
    }))
}

fn parse_scan_request(headers: &HeaderMap, body: &[u8]) -> Result<ScanRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ScanRequest::default());
    }
    if !has_json_content_type(headers) {
        return Err(ApiError::Request {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            message: "Expected request with `Content-Type: application/json`".to_string(),
        });
    }
    let Json(request) = Json::<ScanRequest>::from_bytes(body)?;
    Ok(request)
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return false;
    };
    let Ok(Ok(content_type)) = value.to_str().map(|v| v.parse::<mime::Mime>()) else {
        return false;
    };
    content_type.type_() == mime::APPLICATION
        && (content_type.subtype() == mime::JSON || content_type.suffix() == Some(mime::JSON))
}

/// POST /files/process
async fn process_files(State(library): State<Library>) -> ApiResult<ProcessResponse> {
    let summary = library.process_all().await?;
    Ok(Json(ProcessResponse {
        message: "Processing completed".to_string(),
        summary,
    }))
}

/// POST /files/process/single
async fn process_single_file(
    State(library): State<Library>,
    Json(request): Json<ProcessSingleRequest>,
) -> ApiResult<ProcessSingleResponse> {
    let file = library.process_single(&request.file_path).await?;
    Ok(Json(ProcessSingleResponse {
        message: "File processed".to_string(),
        file,
    }))
}

/// GET /files/stats
async fn file_stats(State(library): State<Library>) -> ApiResult<StoreStats> {
    Ok(Json(library.stats().await?))
}

/// GET /settings
async fn list_settings(State(library): State<Library>) -> ApiResult<Vec<Setting>> {
    Ok(Json(library.settings().await?))
}

/// POST /settings
async fn update_setting(
    State(library): State<Library>,
    Json(request): Json<SettingRequest>,
) -> ApiResult<MessageResponse> {
    library.put_setting(&request.name, &request.value).await?;
    Ok(Json(MessageResponse {
        message: format!("Setting {} updated", request.name),
    }))
}

/// Creates the axum Router with all API routes
pub fn create_router(library: Library) -> Router {
    Router::new()
        .route("/files", get(list_files))
        .route("/files/check", get(check_files))
        .route("/files/scan", post(scan_files))
        .route("/files/process", post(process_files))
        .route("/files/process/single", post(process_single_file))
        .route("/files/stats", get(file_stats))
        .route("/settings", get(list_settings).post(update_setting))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(library)
}

/// Serve the API on `bind` until the process is stopped.
pub async fn run_server(library: Library, bind: &str) -> Result<(), ServerError> {
    let app = create_router(library);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind.to_string(),
            source,
        })?;
    info!("Listening on {}", bind);

    axum::serve(listener, app).await?;
    Ok(())
}
