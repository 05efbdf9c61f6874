//! Marks seats of a screening available without touching live holds.
//!
//! Usage: `seed-seats <screening_id> [label...]`. Without labels the
//! default A1..C6 grid is seeded.

use anyhow::{bail, Context};
use cinebook_core::{SeatKey, SeatStore};
use cinebook_store::{app_config::Config, RedisSeatStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn default_grid() -> Vec<String> {
    ['A', 'B', 'C']
        .iter()
        .flat_map(|row| (1..=6).map(move |n| format!("{}{}", row, n)))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(screening) = args.next() else {
        bail!("usage: seed-seats <screening_id> [label...]");
    };
    let screening_id = Uuid::parse_str(&screening).context("screening_id must be a UUID")?;

    let mut labels: Vec<String> = args.collect();
    if labels.is_empty() {
        labels = default_grid();
    }
    let keys = SeatKey::for_labels(screening_id, &labels)?;

    let config = Config::load().context("Failed to load config")?;
    let store = RedisSeatStore::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let seeded = store.seed(&keys).await?;
    tracing::info!(
        "Seeded {} of {} seats for screening {} ({} already present)",
        seeded,
        keys.len(),
        screening_id,
        keys.len() - seeded
    );

    Ok(())
}
