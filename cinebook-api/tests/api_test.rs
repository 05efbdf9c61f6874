use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use cinebook_api::{app, middleware::OwnerClaims, AppState, AuthConfig};
use cinebook_core::{Booking, BookingRepoError, BookingRepository, NewBooking, SeatKey, SeatState, SeatStore};
use cinebook_reservation::ReservationService;
use cinebook_store::{app_config::ReservationRules, MemoryBookingRepository, MemorySeatStore};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    seats: Arc<MemorySeatStore>,
}

fn test_app() -> TestApp {
    test_app_with(Arc::new(MemoryBookingRepository::new()))
}

fn test_app_with(bookings: Arc<dyn BookingRepository>) -> TestApp {
    let seats = Arc::new(MemorySeatStore::new());
    let reservations = ReservationService::new(
        seats.clone(),
        bookings,
        ReservationRules { hold_ttl_seconds: 600, reserved_ttl_seconds: 3600, max_seats_per_hold: 10 },
    );
    let state = AppState {
        reservations: Arc::new(reservations),
        auth: AuthConfig { secret: SECRET.to_string() },
    };
    TestApp { router: app(state), seats }
}

fn token_for(user: Uuid) -> String {
    let claims = OwnerClaims {
        sub: user.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(router: &Router, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let t = test_app();
    let (status, body) = call(&t.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_v1_routes_require_valid_token() {
    let t = test_app();
    let body = json!({ "screening_id": Uuid::new_v4(), "seat_labels": ["A1"] });

    let (status, _) = call(&t.router, "POST", "/v1/holds", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/holds")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_hold_confirm_and_conflict_flow() {
    let t = test_app();
    let screening = Uuid::new_v4();
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    t.seats.seed(&SeatKey::for_labels(screening, &["A1", "A2"]).unwrap()).await.unwrap();

    let (status, hold) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(u1),
        Some(json!({ "screening_id": screening, "seat_labels": ["A1", "A2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["ok"], true);
    assert_eq!(hold["seat_keys"][0], format!("screening:{}:seat:A1", screening));
    assert!(hold["expires_at"].is_string());
    let hold_id = hold["hold_id"].as_str().unwrap().to_string();

    let (status, booking) = call(
        &t.router,
        "POST",
        "/v1/bookings/confirm",
        Some(u1),
        Some(json!({
            "hold_id": hold_id,
            "screening_id": screening,
            "seat_labels": ["A1", "A2"],
            "total_amount": 2400
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking_id = booking["booking_id"].as_str().unwrap().to_string();

    let (status, seats) =
        call(&t.router, "GET", &format!("/v1/screenings/{}/seats?labels=A1,A2", screening), Some(u2), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seats["seats"][0]["state"], "RESERVED");
    assert_eq!(seats["seats"][1]["booking_id"], booking_id);

    let (status, conflict) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(u2),
        Some(json!({ "screening_id": screening, "seat_labels": ["A1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["ok"], false);
    assert_eq!(conflict["unavailable_keys"], json!([format!("screening:{}:seat:A1", screening)]));
}

#[tokio::test]
async fn test_idempotent_confirm_replays_booking() {
    let t = test_app();
    let screening = Uuid::new_v4();
    let user = Uuid::new_v4();

    let (_, hold) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(user),
        Some(json!({ "screening_id": screening, "seat_labels": ["B4"] })),
    )
    .await;
    let confirm = json!({
        "hold_id": hold["hold_id"],
        "screening_id": screening,
        "seat_labels": ["B4"],
        "idempotency_key": "checkout-1",
        "total_amount": 1200
    });

    let (status, first) = call(&t.router, "POST", "/v1/bookings/confirm", Some(user), Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, replay) = call(&t.router, "POST", "/v1/bookings/confirm", Some(user), Some(confirm)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["idempotent"], true);
    assert_eq!(replay["booking"]["id"], first["booking_id"]);
    assert_eq!(replay["booking"]["status"], "PENDING");
}

#[tokio::test]
async fn test_confirm_by_other_user_is_conflict() {
    let t = test_app();
    let screening = Uuid::new_v4();

    let (_, hold) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(Uuid::new_v4()),
        Some(json!({ "screening_id": screening, "seat_labels": ["C1"] })),
    )
    .await;

    let (status, body) = call(
        &t.router,
        "POST",
        "/v1/bookings/confirm",
        Some(Uuid::new_v4()),
        Some(json!({
            "hold_id": hold["hold_id"],
            "screening_id": screening,
            "seat_labels": ["C1"],
            "total_amount": 900
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["unavailable_keys"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_release_endpoint_frees_own_seats() {
    let t = test_app();
    let screening = Uuid::new_v4();
    let user = Uuid::new_v4();

    let (_, hold) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(user),
        Some(json!({ "screening_id": screening, "seat_labels": ["D1", "D2"] })),
    )
    .await;
    let uri = format!("/v1/holds/{}/release", hold["hold_id"].as_str().unwrap());
    let release = json!({ "screening_id": screening, "seat_labels": ["D1", "D2"] });

    let (status, body) = call(&t.router, "POST", &uri, Some(Uuid::new_v4()), Some(release.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 0);
    assert_eq!(body["not_owned"].as_array().map(Vec::len), Some(2));

    let (status, body) = call(&t.router, "POST", &uri, Some(user), Some(release)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 2);

    let (_, seats) =
        call(&t.router, "GET", &format!("/v1/screenings/{}/seats?labels=D1,D2", screening), Some(user), None).await;
    assert_eq!(seats["seats"][0]["state"], "AVAILABLE");
}

#[tokio::test]
async fn test_validation_errors_are_bad_request() {
    let t = test_app();
    let user = Some(Uuid::new_v4());

    let (status, body) = call(
        &t.router,
        "POST",
        "/v1/holds",
        user,
        Some(json!({ "screening_id": Uuid::new_v4(), "seat_labels": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let (status, _) = call(
        &t.router,
        "POST",
        "/v1/holds",
        user,
        Some(json!({ "screening_id": Uuid::new_v4(), "seat_labels": ["A1", "A1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.router,
        "GET",
        &format!("/v1/screenings/{}/seats?labels=", Uuid::new_v4()),
        user,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_gets_error_envelope() {
    let t = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/bookings/confirm")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(Uuid::new_v4())))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"hold_id\": "))
        .unwrap();

    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ok"], false);
    assert!(body["error"].is_string());

    let (status, body) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(Uuid::new_v4()),
        Some(json!({ "screening_id": "not-a-uuid", "seat_labels": ["A1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

/// Durable store that is down for writes.
struct UnavailableBookings;

#[async_trait]
impl BookingRepository for UnavailableBookings {
    async fn insert_booking(&self, _booking: &NewBooking) -> Result<Booking, BookingRepoError> {
        Err(BookingRepoError::Database("connection refused".into()))
    }

    async fn find_by_idempotency_key(&self, _key: &str) -> Result<Option<Booking>, BookingRepoError> {
        Ok(None)
    }

    async fn existing_booking_ids(&self, _ids: &[Uuid]) -> Result<HashSet<Uuid>, BookingRepoError> {
        Ok(HashSet::new())
    }
}

#[tokio::test]
async fn test_durable_write_failure_is_internal_error_and_frees_seats() {
    let t = test_app_with(Arc::new(UnavailableBookings));
    let screening = Uuid::new_v4();
    let user = Uuid::new_v4();

    let (status, hold) = call(
        &t.router,
        "POST",
        "/v1/holds",
        Some(user),
        Some(json!({ "screening_id": screening, "seat_labels": ["E1", "E2"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &t.router,
        "POST",
        "/v1/bookings/confirm",
        Some(user),
        Some(json!({
            "hold_id": hold["hold_id"],
            "screening_id": screening,
            "seat_labels": ["E1", "E2"],
            "total_amount": 1800
        })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["ok"], false);

    let keys = SeatKey::for_labels(screening, &["E1", "E2"]).unwrap();
    assert_eq!(t.seats.inspect(&keys).await.unwrap(), vec![SeatState::Available, SeatState::Available]);
}
