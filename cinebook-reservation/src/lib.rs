pub mod models;
pub mod reconcile;
pub mod service;
pub mod worker;
pub mod writer;

pub use models::{BookingResult, ConfirmRequest, HoldRequest, HoldResult, HoldTicket, ReleaseRequest};
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler};
pub use service::{ReservationError, ReservationService};
pub use worker::spawn_reconciliation_worker;
pub use writer::{BookingWriter, WriteError, WriteOutcome};
