use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::reconcile::Reconciler;

/// Runs a reconciliation pass every `period` until the task is aborted.
pub fn spawn_reconciliation_worker(reconciler: Arc<Reconciler>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Reconciliation worker started, running every {:?}", period);
        let mut ticker = interval(period);
        // A slow pass must not trigger a burst of catch-up passes
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match reconciler.run_once().await {
                Ok(report) if report.released_seats > 0 || report.failures > 0 => {
                    warn!("Reconciliation pass: {:?}", report);
                }
                Ok(report) => {
                    info!(
                        "Reconciliation pass: {} reserved seats, {} orphaned bookings within grace",
                        report.reserved_seats, report.orphaned_bookings
                    );
                }
                Err(e) => error!("Reconciliation pass failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinebook_core::{SeatKey, SeatState, SeatStore};
    use cinebook_store::{MemoryBookingRepository, MemorySeatStore};
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_worker_releases_orphans_on_schedule() {
        let seats = Arc::new(MemorySeatStore::new());
        let keys = SeatKey::for_labels(Uuid::new_v4(), &["A1"]).unwrap();
        let (hold, owner, booking) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        seats.hold(&keys, hold, owner, Duration::from_secs(600)).await.unwrap();
        seats.confirm(&keys, hold, owner, booking, Duration::from_secs(3600)).await.unwrap();

        let reconciler = Arc::new(Reconciler::new(
            seats.clone(),
            Arc::new(MemoryBookingRepository::new()),
            Duration::from_secs(3600),
            Duration::from_secs(120),
        ));
        let handle = spawn_reconciliation_worker(reconciler, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(seats.inspect(&keys).await.unwrap(), vec![SeatState::Reserved { booking_id: booking }]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(seats.inspect(&keys).await.unwrap(), vec![SeatState::Available]);

        handle.abort();
    }
}
