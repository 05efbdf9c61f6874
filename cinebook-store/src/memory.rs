//! In-process implementations of the store traits.
//!
//! `MemorySeatStore` applies the same transitions as the Lua scripts under a
//! single lock, and expires entries against `tokio::time::Instant` so TTL
//! behaviour can be driven with a paused clock.

use async_trait::async_trait;
use chrono::Utc;
use cinebook_core::repository::ensure_keys;
use cinebook_core::{
    Booking, BookingRepoError, BookingRepository, BookingSeat, ConfirmOutcome, HoldOutcome, NewBooking, ReleaseOutcome,
    ReservedSeat, SeatKey, SeatState, SeatStore, SeatStoreError,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

struct Entry {
    state: SeatState,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemorySeatStore {
    seats: Mutex<HashMap<SeatKey, Entry>>,
}

fn live_state(seats: &mut HashMap<SeatKey, Entry>, key: &SeatKey, now: Instant) -> SeatState {
    let expired = matches!(seats.get(key), Some(Entry { expires_at: Some(at), .. }) if *at <= now);
    if expired {
        seats.remove(key);
    }
    seats.get(key).map(|e| e.state.clone()).unwrap_or(SeatState::Available)
}

impl MemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn release_matching(
        seats: &mut HashMap<SeatKey, Entry>,
        keys: &[SeatKey],
        matches: impl Fn(&SeatState) -> bool,
    ) -> ReleaseOutcome {
        let now = Instant::now();
        let mut outcome = ReleaseOutcome::default();
        for key in keys {
            if matches(&live_state(seats, key, now)) {
                seats.insert(key.clone(), Entry { state: SeatState::Available, expires_at: None });
                outcome.released += 1;
            } else {
                outcome.not_owned.push(key.clone());
            }
        }
        outcome
    }
}

#[async_trait]
impl SeatStore for MemorySeatStore {
    async fn hold(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        ttl: Duration,
    ) -> Result<HoldOutcome, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        let now = Instant::now();

        let unavailable: Vec<SeatKey> = keys
            .iter()
            .filter(|k| !live_state(&mut seats, k, now).is_available())
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            return Ok(HoldOutcome::Conflict { unavailable });
        }

        for key in keys {
            seats.insert(
                key.clone(),
                Entry { state: SeatState::Held { hold_id, owner_id }, expires_at: Some(now + ttl) },
            );
        }
        Ok(HoldOutcome::Held)
    }

    async fn confirm(
        &self,
        keys: &[SeatKey],
        hold_id: Uuid,
        owner_id: Uuid,
        booking_id: Uuid,
        reserved_ttl: Duration,
    ) -> Result<ConfirmOutcome, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        let now = Instant::now();

        let rejected: Vec<SeatKey> = keys
            .iter()
            .filter(|k| !live_state(&mut seats, k, now).is_held_by(hold_id, owner_id))
            .cloned()
            .collect();
        if !rejected.is_empty() {
            return Ok(ConfirmOutcome::Rejected { rejected });
        }

        for key in keys {
            seats.insert(
                key.clone(),
                Entry { state: SeatState::Reserved { booking_id }, expires_at: Some(now + reserved_ttl) },
            );
        }
        Ok(ConfirmOutcome::Confirmed)
    }

    async fn release(&self, keys: &[SeatKey], hold_id: Uuid, owner_id: Uuid) -> Result<ReleaseOutcome, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        Ok(Self::release_matching(&mut seats, keys, |s| s.is_held_by(hold_id, owner_id)))
    }

    async fn release_reservation(&self, keys: &[SeatKey], booking_id: Uuid) -> Result<ReleaseOutcome, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        Ok(Self::release_matching(&mut seats, keys, |s| s.is_reserved_for(booking_id)))
    }

    async fn seed(&self, keys: &[SeatKey]) -> Result<usize, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        let now = Instant::now();
        let mut seeded = 0;
        for key in keys {
            // refresh expiry bookkeeping before checking presence
            live_state(&mut seats, key, now);
            if !seats.contains_key(key) {
                seats.insert(key.clone(), Entry { state: SeatState::Available, expires_at: None });
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    async fn inspect(&self, keys: &[SeatKey]) -> Result<Vec<SeatState>, SeatStoreError> {
        ensure_keys(keys)?;
        let mut seats = self.seats.lock().await;
        let now = Instant::now();
        Ok(keys.iter().map(|k| live_state(&mut seats, k, now)).collect())
    }

    async fn reserved_seats(&self) -> Result<Vec<ReservedSeat>, SeatStoreError> {
        let mut seats = self.seats.lock().await;
        let now = Instant::now();
        seats.retain(|_, e| e.expires_at.map_or(true, |at| at > now));

        let mut reserved: Vec<ReservedSeat> = seats
            .iter()
            .filter_map(|(key, entry)| match entry.state {
                SeatState::Reserved { booking_id } => Some(ReservedSeat {
                    key: key.clone(),
                    booking_id,
                    remaining_ttl: entry.expires_at.map(|at| at - now),
                }),
                _ => None,
            })
            .collect();
        reserved.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(reserved)
    }
}

#[derive(Default)]
struct BookingTables {
    bookings: HashMap<Uuid, Booking>,
    by_idempotency_key: HashMap<String, Uuid>,
    booked_seats: HashMap<(Uuid, String), BookingSeat>,
}

/// Booking repository with the same uniqueness rules as the SQL schema.
#[derive(Default)]
pub struct MemoryBookingRepository {
    tables: Mutex<BookingTables>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    /// Number of durable seat rows, one per booked seat.
    pub async fn seat_rows(&self) -> usize {
        self.tables.lock().await.booked_seats.len()
    }

    pub async fn booked_seat(&self, screening_id: Uuid, seat_label: &str) -> Option<BookingSeat> {
        self.tables.lock().await.booked_seats.get(&(screening_id, seat_label.to_string())).cloned()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, BookingRepoError> {
        let mut tables = self.tables.lock().await;

        if let Some(key) = &booking.idempotency_key {
            if tables.by_idempotency_key.contains_key(key) {
                return Err(BookingRepoError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        if tables.bookings.contains_key(&booking.booking_id) {
            return Err(BookingRepoError::Database(
                format!("duplicate booking id {}", booking.booking_id).into(),
            ));
        }
        let created_at = Utc::now();
        let seats = booking.seat_rows(created_at);
        if seats
            .iter()
            .any(|s| tables.booked_seats.contains_key(&(s.screening_id, s.seat_label.clone())))
        {
            return Err(BookingRepoError::SeatAlreadyBooked(booking.screening_id));
        }

        let created = booking.clone().into_booking(created_at);
        for seat in seats {
            tables.booked_seats.insert((seat.screening_id, seat.seat_label.clone()), seat);
        }
        if let Some(key) = &created.idempotency_key {
            tables.by_idempotency_key.insert(key.clone(), created.id);
        }
        tables.bookings.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, BookingRepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_idempotency_key
            .get(key)
            .and_then(|id| tables.bookings.get(id))
            .cloned())
    }

    async fn existing_booking_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>, BookingRepoError> {
        let tables = self.tables.lock().await;
        Ok(ids.iter().filter(|id| tables.bookings.contains_key(id)).copied().collect())
    }
}
