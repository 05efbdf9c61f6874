use anyhow::Context;
use cinebook_api::{app, AppState, AuthConfig};
use cinebook_core::{BookingRepository, SeatStore};
use cinebook_reservation::{spawn_reconciliation_worker, Reconciler, ReservationService};
use cinebook_store::{app_config::Config, DbClient, PgBookingRepository, RedisSeatStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinebook_api=debug,cinebook_reservation=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Cinebook API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let seats: Arc<dyn SeatStore> = Arc::new(
        RedisSeatStore::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );
    let bookings: Arc<dyn BookingRepository> = Arc::new(PgBookingRepository::new(db.pool.clone()));

    if config.reconciliation.enabled {
        let reconciler = Reconciler::new(
            seats.clone(),
            bookings.clone(),
            config.reservation.reserved_ttl(),
            config.reconciliation.orphan_grace(),
        );
        spawn_reconciliation_worker(Arc::new(reconciler), config.reconciliation.interval());
    } else {
        tracing::warn!("Reconciliation disabled, orphaned reservations only clear on TTL expiry");
    }

    let reservations = ReservationService::new(seats, bookings, config.reservation.clone());
    let app_state = AppState {
        reservations: Arc::new(reservations),
        auth: AuthConfig { secret: config.auth.jwt_secret.clone() },
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state)).await?;

    Ok(())
}
