//! # Export API
//!
//! Rendered downloads and slide decks for a stage's saved output.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

use discovery_core::export::{export_document, render_presentation, ExportFormat};
use discovery_core::stages::DiscoveryStage;

use super::{ApiError, AppState, ErrorResponse};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// `doc`, `web` or `pdf`
    pub format: Option<String>,
}

/// Saved output for `stage`, empty when nothing has been saved
async fn stage_output(state: &AppState, stage: &str) -> Result<(DiscoveryStage, String), ApiError> {
    let stage: DiscoveryStage = stage.parse()?;
    let output = state
        .with_repository(|repo| repo.load())
        .await?
        .map(|loaded| loaded.state.stage(stage).output)
        .unwrap_or_default();
    Ok((stage, output))
}

/// Export a stage document
#[utoipa::path(
    get,
    path = "/api/export/{stage}",
    tag = "export",
    params(
        ("stage" = String, Path, description = "DOMAIN, BOD, KPI or EPICS"),
        ExportQuery
    ),
    responses(
        (status = 200, description = "Rendered document", content_type = "text/html"),
        (status = 204, description = "Stage has no output"),
        (status = 400, description = "Unknown stage or format", body = ErrorResponse)
    )
)]
pub async fn export_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = match query.format.as_deref() {
        Some(raw) => raw.parse().map_err(ApiError::bad_request)?,
        None => ExportFormat::default(),
    };
    let (stage, output) = stage_output(&state, &stage).await?;

    let Some(document) = export_document(stage, &output, format) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let disposition = match format {
        ExportFormat::Doc => format!("attachment; filename=\"{}\"", document.file_name),
        ExportFormat::Web | ExportFormat::Pdf => {
            format!("inline; filename=\"{}\"", document.file_name)
        }
    };
    Ok((
        [
            (header::CONTENT_TYPE, document.mime_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.body,
    )
        .into_response())
}

/// Render a stage as a slide deck
#[utoipa::path(
    get,
    path = "/api/present/{stage}",
    tag = "export",
    params(("stage" = String, Path, description = "DOMAIN, BOD, KPI or EPICS")),
    responses(
        (status = 200, description = "Printable slide deck", content_type = "text/html"),
        (status = 204, description = "Stage has no output"),
        (status = 400, description = "Unknown stage", body = ErrorResponse)
    )
)]
pub async fn present_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Result<Response, ApiError> {
    let (stage, output) = stage_output(&state, &stage).await?;
    match render_presentation(stage, &output) {
        Some(deck) => Ok((
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            deck,
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
