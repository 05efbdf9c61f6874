use chrono::{DateTime, Utc};
use cinebook_core::{Booking, SeatKey};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub owner_id: Uuid,
    /// Requested hold window; clamped to the configured maximum.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldTicket {
    pub hold_id: Uuid,
    pub owner_id: Uuid,
    pub seat_keys: Vec<SeatKey>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HoldResult {
    Held(HoldTicket),
    Conflict { unavailable: Vec<SeatKey> },
}

#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub hold_id: Uuid,
    pub owner_id: Uuid,
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub total_amount: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookingResult {
    Created(Booking),
    /// The idempotency key already produced this booking.
    Replayed(Booking),
    Conflict { unavailable: Vec<SeatKey> },
}

#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub hold_id: Uuid,
    pub owner_id: Uuid,
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
}
