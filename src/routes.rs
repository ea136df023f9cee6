use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ExportError};
use crate::export::export_infographic;
use crate::models::{GenerateRequest, Notice, ValidateRequest, ValidateResponse};
use crate::orchestrator::{PlanOrchestrator, SessionSnapshot};
use crate::validation::validate_goal;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PlanOrchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session", get(get_session))
        .route("/api/plan", post(generate_plan))
        .route("/api/goal/validate", post(validate))
        .route("/api/session/reset", post(start_over))
        .route("/api/session/notice/dismiss", post(dismiss_notice))
        .route("/api/session/plan.txt", get(copy_plan))
        .route("/api/session/infographic", get(download_infographic))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.orchestrator.snapshot())
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    #[serde(default)]
    pub wait: bool,
}

/// Starts a submission. Answers 202 right away unless `?wait=true`, in which case
/// the response is the settled session.
///
/// The run is always spawned, so a client that hangs up while waiting does not
/// cancel it halfway and leave the session busy.
pub async fn generate_plan(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
    Json(body): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let submission = state.orchestrator.begin(&body.goal, body.timeframe.as_deref())?;

    let accepted = state.orchestrator.snapshot();
    let orchestrator = Arc::clone(&state.orchestrator);
    let run = tokio::spawn(async move { orchestrator.run(submission).await });

    if !params.wait {
        return Ok((StatusCode::ACCEPTED, Json(accepted)));
    }

    if let Err(e) = run.await {
        tracing::error!("Plan generation task failed: {}", e);
    }
    Ok((StatusCode::OK, Json(state.orchestrator.snapshot())))
}

pub async fn validate(Json(body): Json<ValidateRequest>) -> Json<ValidateResponse> {
    let response = match validate_goal(&body.goal) {
        Ok(goal) => ValidateResponse { valid: true, goal: Some(goal.into_inner()), message: None },
        Err(e) => ValidateResponse { valid: false, goal: None, message: Some(e.to_string()) },
    };
    Json(response)
}

pub async fn start_over(State(state): State<AppState>) -> Json<SessionSnapshot> {
    tracing::info!("🔄 Start over requested");
    Json(state.orchestrator.start_over())
}

pub async fn dismiss_notice(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.orchestrator.dismiss_notice())
}

pub async fn copy_plan(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state.orchestrator.plan_text()?;
    state.orchestrator.notify(Notice::info(
        "Plan Copied!",
        "Your personalized life plan text and infographic prompt are now in your clipboard.",
    ));
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

pub async fn download_infographic(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (url, goal) = state.orchestrator.infographic()?;
    let image = export_infographic(&url, goal.as_deref()).map_err(|e| {
        tracing::error!("❌ Failed to export infographic: {}", e);
        state.orchestrator.notify(Notice::error("Download Failed", "Could not download the infographic. Please try again."));
        e
    })?;

    let content_type = HeaderValue::from_str(&image.content_type)
        .map_err(|e| ExportError::InvalidDataUri(e.to_string()))?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", image.filename))
        .map_err(|e| ExportError::InvalidDataUri(e.to_string()))?;

    state.orchestrator.notify(Notice::info("Infographic Downloaded!", "Your personalized infographic has been saved."));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)],
        image.bytes,
    )
        .into_response())
}
