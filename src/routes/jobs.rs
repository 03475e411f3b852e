use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dto::jobs::AdvanceRequest,
    error::AppError,
    services::{
        advance_service::{self, AdvanceOutcome},
        vote_processor::{self, DrainOutcome},
    },
    state::SharedState,
};

/// Trigger endpoints invoked by the scheduler or an operator. Both are
/// guarded by the bearer credential before any lock or queue is touched.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/jobs/process-votes", post(process_vote_queue))
        .route("/jobs/advance-slot", post(advance_slot))
        .route_layer(middleware::from_fn_with_state(
            state,
            require_trigger_secret,
        ))
}

/// Drain the vote event queue into the vote table.
#[utoipa::path(
    post,
    path = "/jobs/process-votes",
    tag = "jobs",
    responses(
        (status = 200, description = "Drain cycle completed", body = crate::dto::jobs::DrainReport),
        (status = 202, description = "Cycle skipped (lock held, disabled, circuit open, or queue empty)", body = crate::dto::jobs::JobSkipped),
        (status = 401, description = "Missing or invalid bearer credential"),
        (status = 503, description = "Queue or store backend unavailable"),
    )
)]
pub async fn process_vote_queue(State(state): State<SharedState>) -> Result<Response, AppError> {
    match vote_processor::drain(&state).await? {
        DrainOutcome::Completed(report) => Ok(Json(report).into_response()),
        DrainOutcome::Skipped(skip) => Ok((StatusCode::ACCEPTED, Json(skip)).into_response()),
    }
}

/// Close the current voting slot and open the next one.
#[utoipa::path(
    post,
    path = "/jobs/advance-slot",
    tag = "jobs",
    request_body = AdvanceRequest,
    responses(
        (status = 200, description = "Slot advanced", body = crate::dto::jobs::AdvanceReport),
        (status = 202, description = "Advancement disabled", body = crate::dto::jobs::JobSkipped),
        (status = 401, description = "Missing or invalid bearer credential"),
        (status = 409, description = "Lost the race against a concurrent advancement"),
    )
)]
pub async fn advance_slot(
    State(state): State<SharedState>,
    Valid(Json(request)): Valid<Json<AdvanceRequest>>,
) -> Result<Response, AppError> {
    match advance_service::advance(&state, request).await? {
        AdvanceOutcome::Completed(report) => Ok(Json(report).into_response()),
        AdvanceOutcome::Skipped(skip) => Ok((StatusCode::ACCEPTED, Json(skip)).into_response()),
    }
}

async fn require_trigger_secret(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_owned())
        .ok_or_else(|| AppError::Unauthorized("missing bearer credential".into()))?;

    match state.config().trigger_secret.as_deref() {
        Some(secret) if secret == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid trigger credential".into())),
        None => Err(AppError::Unauthorized(
            "trigger secret not configured".into(),
        )),
    }
}
