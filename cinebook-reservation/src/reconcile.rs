use cinebook_core::{BookingRepoError, BookingRepository, ReservedSeat, SeatKey, SeatStore, SeatStoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Seats found in the `Reserved` state.
    pub reserved_seats: usize,
    /// Bookings referenced by reserved seats but missing from the durable store.
    pub orphaned_bookings: usize,
    pub released_seats: usize,
    /// Orphaned seats left alone because their reservation is still young.
    pub within_grace: usize,
    pub failures: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Seat store unavailable: {0}")]
    Store(#[from] SeatStoreError),
    #[error("Booking store unavailable: {0}")]
    Repository(#[from] BookingRepoError),
}

/// Releases seats left `Reserved` for bookings that never reached the
/// durable store, e.g. after a crash between confirm and write.
pub struct Reconciler {
    seats: Arc<dyn SeatStore>,
    bookings: Arc<dyn BookingRepository>,
    reserved_ttl: Duration,
    orphan_grace: Duration,
}

impl Reconciler {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        bookings: Arc<dyn BookingRepository>,
        reserved_ttl: Duration,
        orphan_grace: Duration,
    ) -> Self {
        Self { seats, bookings, reserved_ttl, orphan_grace }
    }

    /// Time since the seat was confirmed, derived from its remaining TTL.
    /// A reservation without expiry is always considered old enough.
    fn reservation_age(&self, seat: &ReservedSeat) -> Duration {
        match seat.remaining_ttl {
            Some(remaining) => self.reserved_ttl.saturating_sub(remaining),
            None => Duration::MAX,
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, ReconcileError> {
        let reserved = self.seats.reserved_seats().await?;
        let mut report = ReconcileReport { reserved_seats: reserved.len(), ..Default::default() };
        if reserved.is_empty() {
            return Ok(report);
        }

        let mut by_booking: BTreeMap<Uuid, Vec<ReservedSeat>> = BTreeMap::new();
        for seat in reserved {
            by_booking.entry(seat.booking_id).or_default().push(seat);
        }
        let ids: Vec<Uuid> = by_booking.keys().copied().collect();
        let persisted = self.bookings.existing_booking_ids(&ids).await?;

        for (booking_id, seats) in by_booking {
            if persisted.contains(&booking_id) {
                continue;
            }
            report.orphaned_bookings += 1;

            let age = seats.iter().map(|s| self.reservation_age(s)).max().unwrap_or_default();
            if age < self.orphan_grace {
                report.within_grace += seats.len();
                continue;
            }

            let keys: Vec<SeatKey> = seats.into_iter().map(|s| s.key).collect();
            match self.seats.release_reservation(&keys, booking_id).await {
                Ok(outcome) => {
                    warn!("Released {} orphaned seats of unpersisted booking {}", outcome.released, booking_id);
                    report.released_seats += outcome.released;
                }
                Err(e) => {
                    error!("Failed to release orphaned seats of booking {}: {}", booking_id, e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}
