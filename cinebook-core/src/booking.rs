use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::seat::{SeatKey, SeatKeyError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    /// Minor currency units.
    pub total_amount: i64,
    pub status: BookingStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn seat_keys(&self) -> Result<Vec<SeatKey>, SeatKeyError> {
        SeatKey::for_labels(self.screening_id, &self.seat_labels)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(format!("Unknown booking status: {}", other)),
        }
    }
}

/// Everything the durable store needs to create a booking after a successful
/// confirm. The booking id is the one already written into the seat keys.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub screening_id: Uuid,
    pub seat_labels: Vec<String>,
    pub total_amount: i64,
    pub idempotency_key: Option<String>,
}

impl NewBooking {
    /// One seat row per label, all stamped with the booking's creation time.
    pub fn seat_rows(&self, created_at: DateTime<Utc>) -> Vec<BookingSeat> {
        self.seat_labels
            .iter()
            .map(|label| BookingSeat {
                booking_id: self.booking_id,
                screening_id: self.screening_id,
                seat_label: label.clone(),
                created_at,
            })
            .collect()
    }

    pub fn into_booking(self, created_at: DateTime<Utc>) -> Booking {
        Booking {
            id: self.booking_id,
            user_id: self.user_id,
            screening_id: self.screening_id,
            seat_labels: self.seat_labels,
            total_amount: self.total_amount,
            status: BookingStatus::Pending,
            idempotency_key: self.idempotency_key,
            created_at,
        }
    }
}

/// One durable row per booked seat; unique per screening and label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingSeat {
    pub booking_id: Uuid,
    pub screening_id: Uuid,
    pub seat_label: String,
    pub created_at: DateTime<Utc>,
}
