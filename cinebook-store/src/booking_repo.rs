use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinebook_core::{Booking, BookingRepoError, BookingRepository, BookingStatus, NewBooking};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const IDEMPOTENCY_CONSTRAINT: &str = "bookings_idempotency_key_key";
const SEAT_CONSTRAINT: &str = "booking_seats_screening_seat_key";

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    screening_id: Uuid,
    seat_labels: Vec<String>,
    total_amount: i64,
    status: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingRepoError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| BookingRepoError::Database(e.into()))?;
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            screening_id: row.screening_id,
            seat_labels: row.seat_labels,
            total_amount: row.total_amount,
            status,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

const SELECT_BOOKING: &str = "SELECT id, user_id, screening_id, seat_labels, total_amount, status, idempotency_key, created_at FROM bookings";

fn classify(err: sqlx::Error, booking: &NewBooking) -> BookingRepoError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            match db.constraint() {
                Some(IDEMPOTENCY_CONSTRAINT) => {
                    return BookingRepoError::DuplicateIdempotencyKey(
                        booking.idempotency_key.clone().unwrap_or_default(),
                    );
                }
                Some(SEAT_CONSTRAINT) => return BookingRepoError::SeatAlreadyBooked(booking.screening_id),
                _ => {}
            }
        }
    }
    BookingRepoError::Database(Box::new(err))
}

fn db_error(err: sqlx::Error) -> BookingRepoError {
    BookingRepoError::Database(Box::new(err))
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, BookingRepoError> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, screening_id, seat_labels, total_amount, status, idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.user_id)
        .bind(booking.screening_id)
        .bind(&booking.seat_labels)
        .bind(booking.total_amount)
        .bind(BookingStatus::Pending.to_string())
        .bind(&booking.idempotency_key)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, booking))?;

        for seat in booking.seat_rows(created_at) {
            sqlx::query(
                r#"
                INSERT INTO booking_seats (booking_id, screening_id, seat_label, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(seat.booking_id)
            .bind(seat.screening_id)
            .bind(&seat.seat_label)
            .bind(seat.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, booking))?;
        }

        tx.commit().await.map_err(db_error)?;
        debug!("Booking {} persisted with {} seats", booking.booking_id, booking.seat_labels.len());

        Ok(booking.clone().into_booking(created_at))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Booking>, BookingRepoError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{} WHERE idempotency_key = $1", SELECT_BOOKING))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(Booking::try_from).transpose()
    }

    async fn existing_booking_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>, BookingRepoError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let found: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM bookings WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(found.into_iter().collect())
    }
}
