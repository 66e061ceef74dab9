//! # Review API
//!
//! Session control over HTTP: start a review, approve candidates at the
//! gate, request revisions, and read status, detail and the exported draft.
//! Calls that drive the pipeline answer once it stops (gate, terminal stage,
//! or error); progress is streamed on `/api/v1/events` meanwhile.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use utoipa::{IntoParams, ToSchema};

use scholar_core::stages::ValidationReport;
use scholar_core::state::{CandidateItem, Draft, Session};
use scholar_core::workflow::{SessionDetail, StatusReport};
use scholar_core::{Language, RunOutcome, SessionError, SessionStatus, Stage, StartOptions};

use super::error::{ApiError, ErrorBody};
use crate::export::{self, ReferenceEntry};
use crate::SharedState;

const HEARTBEAT: Duration = Duration::from_secs(15);
const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

// === Request Types ===

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartReviewRequest {
    /// Research topic
    pub query: String,
    /// Output language: "en" (default) or "zh"
    #[serde(default)]
    pub language: Option<String>,
    /// Backends to search; empty or absent means every configured backend
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApproveRequest {
    /// Candidate ids to keep; all others are unapproved
    pub approved_ids: Vec<String>,
    /// Latest checkpoint version the client saw
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContinueRequest {
    /// Revision instruction for the existing draft
    pub instruction: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum sessions returned (default 20)
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only stream events of this session
    pub session_id: Option<String>,
}

// === Response Types ===

/// Where the pipeline stopped
#[derive(Debug, Serialize, ToSchema)]
pub struct OutcomeResponse {
    pub session_id: String,
    #[schema(value_type = String)]
    pub stage: Stage,
    #[schema(value_type = String)]
    pub status: SessionStatus,
    pub version: u64,
    pub retry_count: u32,
    pub awaiting_approval: bool,
    #[schema(value_type = Vec<Object>)]
    pub candidates: Vec<CandidateItem>,
    #[schema(value_type = Option<Object>)]
    pub draft: Option<Draft>,
    #[schema(value_type = Option<Object>)]
    pub validation: Option<ValidationReport>,
    #[schema(value_type = Option<Object>)]
    pub error: Option<SessionError>,
}

impl From<RunOutcome> for OutcomeResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            awaiting_approval: outcome.stage == Stage::Interrupted,
            session_id: outcome.session_id,
            stage: outcome.stage,
            status: outcome.status,
            version: outcome.version,
            retry_count: outcome.retry_count,
            candidates: outcome.candidates,
            draft: outcome.draft,
            validation: outcome.validation,
            error: outcome.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub session_id: String,
    #[schema(value_type = String)]
    pub stage: Stage,
    #[schema(value_type = String)]
    pub status: SessionStatus,
    pub retry_count: u32,
    pub has_draft: bool,
    pub version: u64,
    pub pending_interrupt: bool,
    #[schema(value_type = Option<Object>)]
    pub error: Option<SessionError>,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            session_id: report.session_id,
            stage: report.stage,
            status: report.status,
            retry_count: report.retry_count,
            has_draft: report.has_draft,
            version: report.version,
            pending_interrupt: report.pending_interrupt,
            error: report.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    #[schema(value_type = Vec<Object>)]
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDetailResponse {
    #[schema(value_type = Object)]
    pub detail: SessionDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DraftResponse {
    pub session_id: String,
    pub version: u64,
    pub title: String,
    /// Draft rendered with `[N]` markers and a reference list
    pub markdown: String,
    #[schema(value_type = Object)]
    pub draft: Draft,
    pub references: Vec<ReferenceEntry>,
}

pub fn review_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_reviews).post(start_review))
        .route("/:id", get(get_review))
        .route("/:id/status", get(get_status))
        .route("/:id/draft", get(get_draft))
        .route("/:id/approve", post(approve_review))
        .route("/:id/continue", post(continue_review))
        .route("/:id/run", post(run_review))
}

// === Handlers ===

/// Start a review and run it to the approval gate
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    tag = "reviews",
    request_body = StartReviewRequest,
    responses(
        (status = 200, description = "Session parked at the approval gate", body = OutcomeResponse),
        (status = 400, description = "Empty query or unknown language", body = ErrorBody),
        (status = 502, description = "Planning or retrieval failed", body = ErrorBody)
    )
)]
pub async fn start_review(
    State(state): State<SharedState>,
    Json(req): Json<StartReviewRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let language = match req.language.as_deref() {
        None => Language::default(),
        Some(raw) => Language::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("unsupported language '{}'", raw)))?,
    };

    let driver = state.driver().await;
    let outcome = driver
        .start(
            query,
            StartOptions {
                language,
                sources: req.sources,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// Approve candidates and run the rest of the pipeline
#[utoipa::path(
    post,
    path = "/api/v1/reviews/{id}/approve",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Pipeline stopped", body = OutcomeResponse),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 409, description = "Stale version, not awaiting approval, or session failed", body = ErrorBody),
        (status = 422, description = "No submitted id matches a candidate", body = ErrorBody)
    )
)]
pub async fn approve_review(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let driver = state.driver().await;
    let outcome = driver
        .approve(&id, &req.approved_ids, req.expected_version)
        .await?;
    Ok(Json(outcome.into()))
}

/// Revise a finished draft
#[utoipa::path(
    post,
    path = "/api/v1/reviews/{id}/continue",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    request_body = ContinueRequest,
    responses(
        (status = 200, description = "Revised draft", body = OutcomeResponse),
        (status = 409, description = "No draft yet, session not finished, or session failed", body = ErrorBody)
    )
)]
pub async fn continue_review(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ContinueRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let instruction = req.instruction.trim();
    if instruction.is_empty() {
        return Err(ApiError::BadRequest("instruction must not be empty".to_string()));
    }
    let driver = state.driver().await;
    let outcome = driver.continue_session(&id, instruction).await?;
    Ok(Json(outcome.into()))
}

/// Drive a session from its latest checkpoint (e.g. after a restart)
#[utoipa::path(
    post,
    path = "/api/v1/reviews/{id}/run",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Pipeline stopped", body = OutcomeResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn run_review(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let driver = state.driver().await;
    Ok(Json(driver.run(&id).await?.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/reviews/{id}/status",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session status", body = StatusResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let driver = state.driver().await;
    Ok(Json(driver.status(&id)?.into()))
}

/// Recent sessions, newest first
#[utoipa::path(
    get,
    path = "/api/v1/reviews",
    tag = "reviews",
    params(ListQuery),
    responses(
        (status = 200, description = "Recent sessions", body = SessionListResponse)
    )
)]
pub async fn list_reviews(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let driver = state.driver().await;
    Ok(Json(SessionListResponse {
        sessions: driver.list_sessions(limit)?,
    }))
}

/// Full session detail: blackboard, checkpoint history, exported draft
#[utoipa::path(
    get,
    path = "/api/v1/reviews/{id}",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session detail", body = SessionDetailResponse),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_review(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetailResponse>, ApiError> {
    let driver = state.driver().await;
    Ok(Json(SessionDetailResponse {
        detail: driver.session_detail(&id)?,
    }))
}

/// Exported draft with its reference list
#[utoipa::path(
    get,
    path = "/api/v1/reviews/{id}/draft",
    tag = "reviews",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Exported draft", body = DraftResponse),
        (status = 404, description = "Unknown session", body = ErrorBody),
        (status = 409, description = "No draft yet", body = ErrorBody)
    )
)]
pub async fn get_draft(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    let driver = state.driver().await;
    let detail = driver.session_detail(&id)?;
    let draft = detail
        .draft
        .ok_or_else(|| scholar_core::PipelineError::NoDraft(id.clone()))?;
    let approved = detail.blackboard.approved_items();

    Ok(Json(DraftResponse {
        session_id: id,
        version: detail.version,
        title: draft.title.clone(),
        markdown: export::markdown(&draft, &approved),
        references: export::references(&approved),
        draft,
    }))
}

/// SSE stream of workflow events with a heartbeat every 15 seconds
pub async fn events(
    State(state): State<SharedState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold((rx, filter.session_id), |(mut rx, session_id)| async move {
        loop {
            let event = match tokio::time::timeout(HEARTBEAT, rx.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => {
                    return Some((Ok(Event::default().comment("heartbeat")), (rx, session_id)));
                }
            };

            if session_id.as_ref().is_some_and(|id| *id != event.session_id) {
                continue;
            }
            let json = serde_json::to_string(&event).unwrap_or_default();
            return Some((Ok(Event::default().data(json)), (rx, session_id)));
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
