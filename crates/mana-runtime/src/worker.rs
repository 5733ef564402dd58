//! Background queue worker with graceful shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

struct Running {
    task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

/// Handle to a running worker.
///
/// Dropping the handle signals shutdown without waiting; call
/// [`shutdown`](Self::shutdown) to wait for the current round to finish.
pub struct WorkerHandle {
    state: Option<Running>,
    notify: Arc<Notify>,
}

impl WorkerHandle {
    /// Spawn a worker that calls `round` until shut down.
    ///
    /// `round` reports whether it found work. A busy worker runs again
    /// immediately; an idle one sleeps for `idle` or until notified.
    pub(crate) fn spawn<F, Fut>(idle: Duration, notify: Arc<Notify>, mut round: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let wake = notify.clone();

        let task = tokio::spawn(async move {
            loop {
                if round().await {
                    match shutdown_rx.try_recv() {
                        Err(oneshot::error::TryRecvError::Empty) => continue,
                        _ => break,
                    }
                }

                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(idle) => {}
                }
            }
            debug!("worker stopped");
        });

        Self {
            state: Some(Running { task, shutdown_tx }),
            notify,
        }
    }

    /// Wake the worker if it is idle.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Signal shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(Running { task, shutdown_tx }) = self.state.take() {
            if shutdown_tx.send(()).is_err() {
                warn!("worker already stopped");
            }
            task.await
                .map_err(|e| RuntimeError::Host(format!("worker task failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(Running { shutdown_tx, .. }) = self.state.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
