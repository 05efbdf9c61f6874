pub mod booking;
pub mod repository;
pub mod seat;

pub use booking::{Booking, BookingSeat, BookingStatus, NewBooking};
pub use repository::{
    BookingRepoError, BookingRepository, ConfirmOutcome, HoldOutcome, ReleaseOutcome, ReservedSeat,
    SeatStore, SeatStoreError,
};
pub use seat::{SeatKey, SeatKeyError, SeatState};
