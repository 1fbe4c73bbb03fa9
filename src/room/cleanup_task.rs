use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use super::service::RoomService;

/// Starts the background sweep that cancels Waiting rooms past their expiry.
/// Runs until the task is aborted.
#[instrument(skip(room_service))]
pub async fn start_cleanup_task(room_service: Arc<RoomService>, cleanup_interval: Duration) {
    info!(
        cleanup_interval_secs = cleanup_interval.as_secs(),
        "Starting room cleanup background task"
    );

    let mut ticker = interval(cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_sweep(&room_service).await;
    }
}

async fn run_sweep(room_service: &RoomService) {
    debug!("Running room cleanup sweep");
    match room_service.cancel_expired_rooms(Utc::now()).await {
        Ok(0) => {}
        Ok(cancelled) => info!(cancelled_count = cancelled, "Room cleanup completed"),
        Err(e) => error!(error = %e, "Room cleanup sweep failed"),
    }
}
