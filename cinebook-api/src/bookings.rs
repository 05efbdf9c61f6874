use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use cinebook_core::Booking;
use cinebook_reservation::{BookingResult, ConfirmRequest};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::holds::conflict_response;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConfirmBookingRequest {
    pub hold_id: Uuid,
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub idempotency_key: Option<String>,
    /// Minor currency units.
    pub total_amount: i64,
}

#[derive(Debug, Serialize)]
struct BookingCreatedResponse {
    ok: bool,
    booking_id: Uuid,
}

#[derive(Debug, Serialize)]
struct BookingReplayResponse {
    ok: bool,
    booking: Booking,
    idempotent: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/bookings/confirm", post(confirm_booking))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(owner_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<ConfirmBookingRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload?;
    let result = state
        .reservations
        .confirm_booking(ConfirmRequest {
            hold_id: req.hold_id,
            owner_id,
            screening_id: req.screening_id,
            seat_labels: req.seat_labels,
            total_amount: req.total_amount,
            idempotency_key: req.idempotency_key,
        })
        .await?;

    let response = match result {
        BookingResult::Created(booking) => {
            info!("Booking confirmed: {}", booking.id);
            (StatusCode::CREATED, Json(BookingCreatedResponse { ok: true, booking_id: booking.id })).into_response()
        }
        BookingResult::Replayed(booking) => {
            (StatusCode::OK, Json(BookingReplayResponse { ok: true, booking, idempotent: true })).into_response()
        }
        BookingResult::Conflict { unavailable } => conflict_response(unavailable),
    };

    Ok(response)
}
