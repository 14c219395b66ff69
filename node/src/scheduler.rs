//! Drives rotation passes on a fixed period until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::service::BatonService;
use crate::shutdown::ShutdownSignal;

/// Spawn the rotation loop.
///
/// Passes run on the blocking pool, one at a time; a pass that overruns
/// the period delays the next tick instead of stacking up.
pub fn spawn_rotation_loop(
    service: Arc<BatonService>,
    period: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_ms = period.as_millis() as u64, "rotation scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    tracing::info!("rotation scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let svc = Arc::clone(&service);
                    if let Err(e) = tokio::task::spawn_blocking(move || svc.rotate()).await {
                        tracing::error!(error = %e, "rotation pass panicked");
                    }
                }
            }
        }
    })
}
