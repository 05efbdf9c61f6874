use cinebook_reservation::ReservationService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
    pub auth: AuthConfig,
}
