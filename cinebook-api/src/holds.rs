use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use cinebook_core::SeatKey;
use cinebook_reservation::{HoldRequest, HoldResult, ReleaseRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HoldResponse {
    ok: bool,
    hold_id: Uuid,
    expires_at: DateTime<Utc>,
    seat_keys: Vec<SeatKey>,
}

#[derive(Debug, Serialize)]
struct ConflictResponse {
    ok: bool,
    unavailable_keys: Vec<SeatKey>,
}

/// `409` listing every seat that blocked the request.
pub(crate) fn conflict_response(unavailable_keys: Vec<SeatKey>) -> Response {
    (StatusCode::CONFLICT, Json(ConflictResponse { ok: false, unavailable_keys })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReleaseHoldRequest {
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReleaseResponse {
    ok: bool,
    released: usize,
    not_owned: Vec<SeatKey>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/holds", post(create_hold))
        .route("/v1/holds/{hold_id}/release", post(release_hold))
}

async fn create_hold(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(owner_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateHoldRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload?;
    let result = state
        .reservations
        .hold_seats(HoldRequest {
            screening_id: req.screening_id,
            seat_labels: req.seat_labels,
            owner_id,
            ttl: req.ttl_seconds.map(Duration::from_secs),
        })
        .await?;

    match result {
        HoldResult::Held(ticket) => Ok((
            StatusCode::CREATED,
            Json(HoldResponse {
                ok: true,
                hold_id: ticket.hold_id,
                expires_at: ticket.expires_at,
                seat_keys: ticket.seat_keys,
            }),
        )
            .into_response()),
        HoldResult::Conflict { unavailable } => Ok(conflict_response(unavailable)),
    }
}

async fn release_hold(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(owner_id)): Extension<AuthenticatedUser>,
    Path(hold_id): Path<Uuid>,
    payload: Result<Json<ReleaseHoldRequest>, JsonRejection>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let Json(req) = payload?;
    let outcome = state
        .reservations
        .release_hold(ReleaseRequest {
            hold_id,
            owner_id,
            screening_id: req.screening_id,
            seat_labels: req.seat_labels,
        })
        .await?;

    Ok(Json(ReleaseResponse { ok: true, released: outcome.released, not_owned: outcome.not_owned }))
}
