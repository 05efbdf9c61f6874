use cinebook_core::{Booking, BookingRepoError, BookingRepository, NewBooking, SeatKey, SeatStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created(Booking),
    Replayed(Booking),
}

#[derive(Debug, thiserror::Error)]
#[error("Booking {booking_id} was reserved but could not be persisted (compensated: {compensated}): {source}")]
pub struct WriteError {
    pub booking_id: Uuid,
    /// Whether the compensating release reached the seat store.
    pub compensated: bool,
    #[source]
    pub source: BookingRepoError,
}

/// Commits confirmed reservations to the durable store.
///
/// Must only be called after the seat store confirmed `keys` for the
/// booking id in the draft.
pub struct BookingWriter {
    bookings: Arc<dyn BookingRepository>,
    seats: Arc<dyn SeatStore>,
}

impl BookingWriter {
    pub fn new(bookings: Arc<dyn BookingRepository>, seats: Arc<dyn SeatStore>) -> Self {
        Self { bookings, seats }
    }

    pub async fn create_booking(&self, booking: NewBooking, keys: &[SeatKey]) -> Result<WriteOutcome, WriteError> {
        let booking_id = booking.booking_id;

        match self.bookings.insert_booking(&booking).await {
            Ok(created) => {
                info!("Booking created: {} ({} seats)", created.id, created.seat_labels.len());
                Ok(WriteOutcome::Created(created))
            }
            Err(BookingRepoError::DuplicateIdempotencyKey(key)) => {
                match self.bookings.find_by_idempotency_key(&key).await {
                    Ok(Some(existing)) => {
                        info!("Idempotent replay of booking {} for key {}", existing.id, key);
                        // No booking will ever reference the seats reserved for this attempt
                        self.compensate(keys, booking_id).await;
                        Ok(WriteOutcome::Replayed(existing))
                    }
                    Ok(None) => {
                        let source = BookingRepoError::Database(
                            format!("idempotency key {} collided but no booking holds it", key).into(),
                        );
                        Err(self.fail(keys, booking_id, source).await)
                    }
                    Err(e) => Err(self.fail(keys, booking_id, e).await),
                }
            }
            Err(e) => Err(self.fail(keys, booking_id, e).await),
        }
    }

    async fn fail(&self, keys: &[SeatKey], booking_id: Uuid, source: BookingRepoError) -> WriteError {
        error!("Failed to persist booking {}: {}", booking_id, source);
        let compensated = self.compensate(keys, booking_id).await;
        WriteError { booking_id, compensated, source }
    }

    /// Single best-effort release of the seats reserved for `booking_id`.
    async fn compensate(&self, keys: &[SeatKey], booking_id: Uuid) -> bool {
        match self.seats.release_reservation(keys, booking_id).await {
            Ok(outcome) => {
                if !outcome.is_complete() {
                    warn!(
                        "Compensation for booking {} left {} seats untouched: {:?}",
                        booking_id,
                        outcome.not_owned.len(),
                        outcome.not_owned
                    );
                }
                true
            }
            Err(e) => {
                error!("Compensation for booking {} failed, seats await reconciliation: {}", booking_id, e);
                false
            }
        }
    }
}
