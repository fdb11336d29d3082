//! # Project API
//!
//! Load and save the single discovery project.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use discovery_core::state::{LoadedProject, ProjectState};
use discovery_core::DiscoveryError;

use super::{ApiError, AppState, ErrorResponse};

/// Saved project plus its revision
#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub project: LoadedProject,
}

/// Full project state to save
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveProjectRequest {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub state: ProjectState,
    /// Reject the save unless the stored revision still matches
    #[serde(default)]
    pub expected_revision: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveProjectResponse {
    pub success: bool,
    pub revision: i64,
    pub versions_added: usize,
}

/// Load the project
#[utoipa::path(
    get,
    path = "/api/project",
    tag = "project",
    responses(
        (status = 200, description = "Saved project", body = ProjectResponse),
        (status = 404, description = "Nothing saved yet", body = ErrorResponse)
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = state
        .with_repository(|repo| repo.load())
        .await?
        .ok_or(DiscoveryError::ProjectNotFound)?;
    Ok(Json(ProjectResponse { project }))
}

/// Save the project
#[utoipa::path(
    post,
    path = "/api/project",
    tag = "project",
    request_body = SaveProjectRequest,
    responses(
        (status = 200, description = "Saved", body = SaveProjectResponse),
        (status = 409, description = "Revision mismatch", body = ErrorResponse),
        (status = 500, description = "Database failure", body = ErrorResponse)
    )
)]
pub async fn save_project(
    State(state): State<AppState>,
    Json(req): Json<SaveProjectRequest>,
) -> Result<Json<SaveProjectResponse>, ApiError> {
    let stage = req.state.current_stage;
    let receipt = state
        .with_repository(move |repo| repo.save(&req.state, req.expected_revision))
        .await?;
    tracing::debug!(stage = %stage, "Save request handled");
    Ok(Json(SaveProjectResponse {
        success: true,
        revision: receipt.revision,
        versions_added: receipt.versions_added,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::tests::{body_json, test_state};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/project")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get() -> Request<Body> {
        Request::builder()
            .uri("/api/project")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_database_is_404() {
        let response = router(test_state()).oneshot(get()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "No project found");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let app = router(test_state());
        let payload = json!({
            "currentStage": "BOD",
            "projectMetadata": {"companyName": "Acme"},
            "stages": {
                "DOMAIN": {"input": "EV charging", "output": "# Domain", "status": "completed"}
            }
        });

        let response = app.clone().oneshot(post(payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let saved = body_json(response).await;
        assert_eq!(saved["success"], true);
        assert_eq!(saved["revision"], 1);
        assert_eq!(saved["versionsAdded"], 1);

        let loaded = body_json(app.oneshot(get()).await.unwrap()).await;
        assert_eq!(loaded["currentStage"], "BOD");
        assert_eq!(loaded["revision"], 1);
        assert_eq!(loaded["projectMetadata"]["companyName"], "Acme");
        assert_eq!(loaded["stages"]["DOMAIN"]["output"], "# Domain");
        assert_eq!(
            loaded["stages"]["DOMAIN"]["versions"].as_array().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_stale_revision_is_409() {
        let app = router(test_state());
        let payload = json!({"currentStage": "DOMAIN", "stages": {}});
        app.clone().oneshot(post(payload.clone())).await.unwrap();
        app.clone().oneshot(post(payload)).await.unwrap();

        let stale = json!({"currentStage": "KPI", "stages": {}, "expectedRevision": 1});
        let response = app.clone().oneshot(post(stale)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["revision"], 2);

        let loaded = body_json(app.oneshot(get()).await.unwrap()).await;
        assert_eq!(loaded["currentStage"], "DOMAIN");
    }
}
