use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::booking::{Booking, NewBooking};
use crate::seat::{SeatKey, SeatState};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of an all-or-nothing hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Held,
    /// Every requested key that was not available. Nothing was acquired.
    Conflict { unavailable: Vec<SeatKey> },
}

/// Result of converting a hold into a reservation.
///
/// A rejection does not say whether the hold expired, never existed or
/// belongs to someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Rejected { rejected: Vec<SeatKey> },
}

/// Result of an owner-checked release. Keys that matched were released,
/// the rest were left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub released: usize,
    pub not_owned: Vec<SeatKey>,
}

impl ReleaseOutcome {
    pub fn is_complete(&self) -> bool {
        self.not_owned.is_empty()
    }
}

/// A seat currently in the `Reserved` state, as seen by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedSeat {
    pub key: SeatKey,
    pub booking_id: Uuid,
    /// `None` when the key carries no expiry.
    pub remaining_ttl: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum SeatStoreError {
    #[error("Seat key set must not be empty")]
    EmptyKeySet,
    #[error("Atomic script {script} unavailable after reload: {reason}")]
    ScriptUnavailable { script: &'static str, reason: String },
    #[error("Malformed reply from {script}: {reply:?}")]
    MalformedReply { script: &'static str, reply: Vec<String> },
    #[error("Corrupt seat state at {key}: {value}")]
    CorruptState { key: String, value: String },
    #[error("Coordination store error: {0}")]
    Backend(#[source] BoxError),
}

pub fn ensure_keys(keys: &[SeatKey]) -> Result<(), SeatStoreError> {
    if keys.is_empty() {
        return Err(SeatStoreError::EmptyKeySet);
    }
    Ok(())
}

/// Atomic seat-key operations against the shared coordination store.
///
/// Every mutation goes through one of these calls; callers never
/// read-then-write a seat key themselves.
#[async_trait]
pub trait SeatStore: Send + Sync {
    async fn hold(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        ttl: Duration,
    ) -> Result<HoldOutcome, SeatStoreError>;

    async fn confirm(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        booking_id: Uuid,
        reserved_ttl: Duration,
    ) -> Result<ConfirmOutcome, SeatStoreError>;

    async fn release(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
    ) -> Result<ReleaseOutcome, SeatStoreError>;

    /// Reverts keys still reserved for `booking_id` back to available.
    async fn release_reservation(
        &self,
        keys: &[SeatKey],
        booking_id: Uuid,
    ) -> Result<ReleaseOutcome, SeatStoreError>;

    /// Marks absent keys available. Returns how many keys were newly seeded.
    async fn seed(&self, keys: &[SeatKey]) -> Result<usize, SeatStoreError>;

    async fn inspect(&self, keys: &[SeatKey]) -> Result<Vec<SeatState>, SeatStoreError>;

    async fn reserved_seats(&self) -> Result<Vec<ReservedSeat>, SeatStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BookingRepoError {
    #[error("Idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),
    #[error("Seat already booked for screening {0}")]
    SeatAlreadyBooked(Uuid),
    #[error("Database error: {0}")]
    Database(#[source] BoxError),
}

/// Durable system of record for bookings.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Writes the booking and one seat row per label in a single transaction.
    async fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, BookingRepoError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, BookingRepoError>;

    /// The subset of `ids` that have a durable booking.
    async fn existing_booking_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>, BookingRepoError>;
}
