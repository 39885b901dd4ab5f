//! Long-lived supervision loops for the routing core.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use foglet_status::StatusReporter;

use crate::router::MessageRouter;

/// Periodically sample the processed-message counter and publish the
/// average messages/second since the previous sample.
pub async fn run_speed_sampler(
    status: Arc<StatusReporter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_count = status.processed_messages();
    let mut last_time = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let now = Instant::now();
                let count = status.processed_messages();
                let elapsed = now.duration_since(last_time).as_secs_f32();
                if elapsed > 0.0 {
                    let speed = (count.saturating_sub(last_count)) as f32 / elapsed;
                    status.set_average_speed(speed);
                    debug!(speed, "message processing speed sampled");
                }
                last_count = count;
                last_time = now;
            }
            _ = shutdown.changed() => {
                info!("speed sampler shutting down");
                break;
            }
        }
    }
}

/// Run the broker/endpoint liveness watchdog until shutdown.
pub async fn run_watchdog(
    router: Arc<MessageRouter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                router.watchdog_tick().await;
            }
            _ = shutdown.changed() => {
                info!("routing watchdog shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn speed_sampler_publishes_an_average() {
        let status = Arc::new(StatusReporter::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_speed_sampler(
            status.clone(),
            Duration::from_millis(20),
            shutdown_rx,
        ));

        // Arrivals land inside the first sampling window.
        for _ in 0..50 {
            status.increment_processed_messages();
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = shutdown_tx.send(true);
        handle.await.unwrap();

        assert!(status.average_speed() > 0.0);
    }
}
