//! Process-wide stop flag shared by the rotation loop and the HTTP server.
//!
//! Backed by a `tokio::sync::watch` channel so a task that starts waiting
//! after the stop was requested still observes it.

use tokio::signal;
use tokio::sync::watch;

/// Owns the stop flag. Cheap to clone; clones flip the same flag.
#[derive(Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// A waiter handed to one background task.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Completes when a stop has been requested. Also completes if every
    /// controller has been dropped, since nobody is left to request one.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request a stop. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn triggered(&self) {
        self.subscribe().wait().await;
    }

    /// Park until SIGINT or SIGTERM arrives (or someone else calls
    /// [`shutdown`](Self::shutdown)), then request a stop.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        let sigterm = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let sigterm = std::future::pending::<()>();

        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!(signal = "SIGINT", "stopping"),
            _ = sigterm => tracing::info!(signal = "SIGTERM", "stopping"),
            _ = self.triggered() => {}
        }
        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn every_task_signal_wakes() {
        let controller = ShutdownController::new();
        let mut scheduler = controller.subscribe();
        let mut server = controller.clone().subscribe();
        let waiting = tokio::spawn(async move {
            scheduler.wait().await;
            server.wait().await;
        });
        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn a_signal_taken_after_the_stop_still_fires() {
        let controller = ShutdownController::new();
        assert!(!controller.is_triggered());
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_triggered());
        let mut late = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(1), late.wait())
            .await
            .unwrap();
    }
}
