use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use cinebook_core::{SeatKey, SeatState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SeatsQuery {
    /// Comma separated seat labels, e.g. `A1,A2`.
    pub labels: String,
}

#[derive(Debug, Serialize)]
struct SeatView {
    seat_key: SeatKey,
    #[serde(flatten)]
    state: SeatState,
}

#[derive(Debug, Serialize)]
struct SeatsResponse {
    ok: bool,
    screening_id: Uuid,
    seats: Vec<SeatView>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/screenings/{screening_id}/seats", get(seat_states))
}

async fn seat_states(
    State(state): State<AppState>,
    Path(screening_id): Path<Uuid>,
    Query(query): Query<SeatsQuery>,
) -> Result<Json<SeatsResponse>, AppError> {
    let labels: Vec<String> = query
        .labels
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let seats = state
        .reservations
        .seat_states(screening_id, &labels)
        .await?
        .into_iter()
        .map(|(seat_key, state)| SeatView { seat_key, state })
        .collect();

    Ok(Json(SeatsResponse { ok: true, screening_id, seats }))
}
