use chrono::Utc;
use cinebook_core::{
    BookingRepoError, BookingRepository, ConfirmOutcome, HoldOutcome, NewBooking, ReleaseOutcome, SeatKey,
    SeatKeyError, SeatStore, SeatStoreError,
};
use cinebook_store::app_config::ReservationRules;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{BookingResult, ConfirmRequest, HoldRequest, HoldResult, HoldTicket, ReleaseRequest};
use crate::writer::{BookingWriter, WriteError, WriteOutcome};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Idempotency key {0} belongs to another user")]
    IdempotencyKeyReused(String),

    #[error("Seat store unavailable: {0}")]
    Store(#[from] SeatStoreError),

    #[error("Booking store unavailable: {0}")]
    Repository(#[from] BookingRepoError),

    #[error(transparent)]
    Persistence(#[from] WriteError),
}

impl From<SeatKeyError> for ReservationError {
    fn from(err: SeatKeyError) -> Self {
        ReservationError::Validation(err.to_string())
    }
}

/// Hold, confirm and release seats for one screening at a time.
pub struct ReservationService {
    seats: Arc<dyn SeatStore>,
    bookings: Arc<dyn BookingRepository>,
    writer: BookingWriter,
    rules: ReservationRules,
}

impl ReservationService {
    pub fn new(seats: Arc<dyn SeatStore>, bookings: Arc<dyn BookingRepository>, rules: ReservationRules) -> Self {
        let writer = BookingWriter::new(bookings.clone(), seats.clone());
        Self { seats, bookings, writer, rules }
    }

    fn seat_keys(&self, screening_id: Uuid, labels: &[String]) -> Result<Vec<SeatKey>, ReservationError> {
        if labels.is_empty() {
            return Err(ReservationError::Validation("seat_labels must not be empty".to_string()));
        }
        if labels.len() > self.rules.max_seats_per_hold {
            return Err(ReservationError::Validation(format!(
                "at most {} seats per request",
                self.rules.max_seats_per_hold
            )));
        }
        Ok(SeatKey::for_labels(screening_id, labels)?)
    }

    fn hold_ttl(&self, requested: Option<Duration>) -> Duration {
        let max = self.rules.hold_ttl();
        match requested {
            Some(ttl) => ttl.clamp(Duration::from_secs(1), max.max(Duration::from_secs(1))),
            None => max,
        }
    }

    pub async fn hold_seats(&self, req: HoldRequest) -> Result<HoldResult, ReservationError> {
        let keys = self.seat_keys(req.screening_id, &req.seat_labels)?;
        let ttl = self.hold_ttl(req.ttl);
        let hold_id = Uuid::new_v4();

        match self.seats.hold(&keys, hold_id, req.owner_id, ttl).await? {
            HoldOutcome::Held => {
                info!("Hold {} placed on {} seats by {} for {:?}", hold_id, keys.len(), req.owner_id, ttl);
                let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
                Ok(HoldResult::Held(HoldTicket { hold_id, owner_id: req.owner_id, seat_keys: keys, expires_at }))
            }
            HoldOutcome::Conflict { unavailable } => {
                info!("Hold rejected for {}: {} seats unavailable", req.owner_id, unavailable.len());
                Ok(HoldResult::Conflict { unavailable })
            }
        }
    }

    pub async fn confirm_booking(&self, req: ConfirmRequest) -> Result<BookingResult, ReservationError> {
        let keys = self.seat_keys(req.screening_id, &req.seat_labels)?;
        if req.total_amount < 0 {
            return Err(ReservationError::Validation("total_amount must not be negative".to_string()));
        }
        if let Some(key) = &req.idempotency_key {
            if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(ReservationError::Validation(format!(
                    "idempotency_key must be 1 to {} characters",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
            // A retry of a request that already succeeded finds its seats reserved,
            // so it is answered before touching the seat store.
            if let Some(existing) = self.bookings.find_by_idempotency_key(key).await? {
                return self.replay(existing, req.owner_id, key);
            }
        }

        let booking_id = Uuid::new_v4();
        let outcome = self
            .seats
            .confirm(&keys, req.hold_id, req.owner_id, booking_id, self.rules.reserved_ttl())
            .await?;
        if let ConfirmOutcome::Rejected { rejected } = outcome {
            warn!("Confirm of hold {} by {} rejected on {} seats", req.hold_id, req.owner_id, rejected.len());
            return Ok(BookingResult::Conflict { unavailable: rejected });
        }
        info!("Hold {} confirmed as booking {}", req.hold_id, booking_id);

        let draft = NewBooking {
            booking_id,
            user_id: req.owner_id,
            screening_id: req.screening_id,
            seat_labels: req.seat_labels,
            total_amount: req.total_amount,
            idempotency_key: req.idempotency_key,
        };
        let idempotency_key = draft.idempotency_key.clone().unwrap_or_default();

        match self.writer.create_booking(draft, &keys).await? {
            WriteOutcome::Created(booking) => Ok(BookingResult::Created(booking)),
            WriteOutcome::Replayed(existing) => self.replay(existing, req.owner_id, &idempotency_key),
        }
    }

    fn replay(
        &self,
        existing: cinebook_core::Booking,
        owner_id: Uuid,
        key: &str,
    ) -> Result<BookingResult, ReservationError> {
        if existing.user_id != owner_id {
            warn!("Idempotency key {} presented by {} but owned by {}", key, owner_id, existing.user_id);
            return Err(ReservationError::IdempotencyKeyReused(key.to_string()));
        }
        Ok(BookingResult::Replayed(existing))
    }

    pub async fn release_hold(&self, req: ReleaseRequest) -> Result<ReleaseOutcome, ReservationError> {
        let keys = self.seat_keys(req.screening_id, &req.seat_labels)?;
        let outcome = self.seats.release(&keys, req.hold_id, req.owner_id).await?;
        info!(
            "Hold {} released by {}: {} seats freed, {} not owned",
            req.hold_id,
            req.owner_id,
            outcome.released,
            outcome.not_owned.len()
        );
        Ok(outcome)
    }

    pub async fn seat_states(
        &self,
        screening_id: Uuid,
        labels: &[String],
    ) -> Result<Vec<(SeatKey, cinebook_core::SeatState)>, ReservationError> {
        if labels.is_empty() {
            return Err(ReservationError::Validation("labels must not be empty".to_string()));
        }
        let keys = SeatKey::for_labels(screening_id, labels)?;
        let states = self.seats.inspect(&keys).await?;
        Ok(keys.into_iter().zip(states).collect())
    }
}
