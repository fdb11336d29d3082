//! # HTTP API
//!
//! Routes, shared state and error mapping for the Discovery server.

pub mod analyze;
pub mod export;
pub mod project;
pub mod voice;

use axum::{
    body::Body,
    http::{header, Response, StatusCode, Uri},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{OpenApi, ToSchema};

use discovery_core::analysis::AnalysisBackend;
use discovery_core::state::ProjectRepository;
use discovery_core::voice::VoiceService;
use discovery_core::DiscoveryError;

/// Bundled landing page
#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<ProjectRepository>,
    /// `None` when the provider key is not configured
    pub analyzer: Option<Arc<dyn AnalysisBackend>>,
    pub voice: Option<Arc<VoiceService>>,
    /// Environment variable named in missing-credential errors
    pub api_key_env: &'static str,
}

impl AppState {
    fn analyzer(&self) -> Result<Arc<dyn AnalysisBackend>, DiscoveryError> {
        self.analyzer
            .clone()
            .ok_or(DiscoveryError::MissingCredential(self.api_key_env))
    }

    fn voice(&self) -> Result<Arc<VoiceService>, DiscoveryError> {
        self.voice
            .clone()
            .ok_or(DiscoveryError::MissingCredential(self.api_key_env))
    }

    /// Run a repository call on the blocking pool. The connection sits
    /// behind a std mutex and rusqlite calls block.
    pub async fn with_repository<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&ProjectRepository) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || f(&repository)).await?
    }
}

/// Error body shared by every route
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Current project revision, present on 409
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: message.into(),
                revision: None,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let (status, revision) = match err.downcast_ref::<DiscoveryError>() {
            Some(DiscoveryError::ProjectNotFound) => (StatusCode::NOT_FOUND, None),
            Some(DiscoveryError::RevisionConflict { actual, .. }) => {
                (StatusCode::CONFLICT, Some(*actual))
            }
            Some(DiscoveryError::MissingCredential(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            Some(_) => (StatusCode::BAD_REQUEST, None),
            None => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", err), "Request failed");
        }
        Self {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                revision,
            },
        }
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        anyhow::Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Discovery API",
        version = "1.0.0",
        description = "Project persistence, streamed stage analysis, voice commands and export for the Discovery workbench"
    ),
    paths(
        project::get_project,
        project::save_project,
        analyze::analyze,
        voice::voice,
        export::export_stage,
        export::present_stage
    ),
    components(schemas(
        ErrorResponse,
        project::SaveProjectRequest,
        project::SaveProjectResponse,
        project::ProjectResponse,
        analyze::AnalyzeRequest,
        voice::VoiceResponse
    )),
    tags(
        (name = "project", description = "Project persistence"),
        (name = "analysis", description = "Streamed stage analysis"),
        (name = "voice", description = "Voice commands"),
        (name = "export", description = "Document and slide export")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn asset_response(status: StatusCode, mime: &str, data: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime)
        .body(Body::from(data))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn serve_static(uri: Uri) -> Response<Body> {
    let path = uri.path().trim_start_matches('/');

    if let Some(file) = Assets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return asset_response(StatusCode::OK, mime.as_ref(), file.data.to_vec());
    }

    // SPA fallback
    if let Some(file) = Assets::get("index.html") {
        return asset_response(StatusCode::OK, "text/html", file.data.to_vec());
    }

    asset_response(StatusCode::NOT_FOUND, "text/plain", b"Not Found".to_vec())
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/project",
            get(project::get_project).post(project::save_project),
        )
        .route("/api/analyze", post(analyze::analyze))
        .route("/api/voice", post(voice::voice))
        .route("/api/export/:stage", get(export::export_stage))
        .route("/api/present/:stage", get(export::present_stage))
        .route("/api/openapi.json", get(serve_openapi))
        .fallback(get(serve_static))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::Request;
    use discovery_core::state::DiscoveryDb;
    use tower::ServiceExt;

    /// State over a fresh in-memory database with no model providers
    pub(crate) fn test_state() -> AppState {
        let db = DiscoveryDb::open_in_memory().unwrap();
        AppState {
            repository: Arc::new(ProjectRepository::new(&db)),
            analyzer: None,
            voice: None,
            api_key_env: "GROQ_API_KEY",
        }
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_repository_calls_leave_the_runtime_thread() {
        let state = test_state();
        let caller = std::thread::current().id();
        let (worker, loaded) = state
            .with_repository(|repo| Ok((std::thread::current().id(), repo.load()?)))
            .await
            .unwrap();
        assert_ne!(worker, caller);
        assert!(loaded.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (DiscoveryError::ProjectNotFound, StatusCode::NOT_FOUND),
            (
                DiscoveryError::RevisionConflict {
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                DiscoveryError::MissingCredential("GROQ_API_KEY"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DiscoveryError::UnknownStage("ROADMAP".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        let generic = ApiError::from(anyhow::anyhow!("upstream down"));
        assert_eq!(generic.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_openapi_lists_routes() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        for path in [
            "/api/project",
            "/api/analyze",
            "/api/voice",
            "/api/export/{stage}",
            "/api/present/{stage}",
        ] {
            assert!(doc["paths"].get(path).is_some(), "missing {}", path);
        }
    }

    #[tokio::test]
    async fn test_unknown_path_serves_landing_page() {
        let response = router(test_state())
            .oneshot(Request::builder().uri("/stages/bod").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html"
        );
    }
}
