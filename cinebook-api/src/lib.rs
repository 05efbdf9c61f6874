use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod holds;
pub mod middleware;
pub mod screenings;
pub mod state;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let v1 = Router::new()
        .merge(holds::routes())
        .merge(bookings::routes())
        .merge(screenings::routes())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::require_owner));

    Router::new()
        .route("/health", get(health))
        .merge(v1)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
