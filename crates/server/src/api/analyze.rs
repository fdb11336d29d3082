//! # Analysis API
//!
//! `POST /api/analyze` streams a stage document back as Server-Sent Events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use utoipa::ToSchema;

use discovery_core::analysis::{AnalysisEvent, AnalysisRequest};

use super::{ApiError, AppState, ErrorResponse};

/// Analysis inputs assembled by the client
#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub request: AnalysisRequest,
}

fn to_sse(event: AnalysisEvent) -> Event {
    Event::default().event(event.event_name()).data(event.data())
}

/// Stream a stage analysis
#[utoipa::path(
    post,
    path = "/api/analyze",
    tag = "analysis",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "`sources`, `text`, `done` and `error` events", content_type = "text/event-stream"),
        (status = 500, description = "Missing credentials or upstream failure", body = ErrorResponse)
    )
)]
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let analyzer = state.analyzer()?;
    let events = analyzer.analyze(body.request).await?;

    let stream = events.map(|event| {
        let event = event.unwrap_or_else(|e| AnalysisEvent::Error(e.to_string()));
        Ok::<_, Infallible>(to_sse(event))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
