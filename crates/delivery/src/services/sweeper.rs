//! Periodic sweep loop for the retry queue.
//!
//! The loop is an explicit tokio task owned by the process's top-level
//! lifecycle: spawned at startup, stopped through its handle at
//! shutdown. Each tick sweeps expired in-flight records and hands the
//! reclaimed batch to the consumer callback outside the queue lock.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::retry_queue::{RetryQueue, RetryRecord};

/// Handle for stopping a running sweep loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to finish. In-flight
    /// retry records are dropped with the process; nothing is flushed.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the fixed-interval sweep task for `queue`.
///
/// `on_retry_batch` receives each non-empty reclaimed batch and is
/// awaited between ticks, never under the queue lock.
pub fn spawn_sweep_loop<T, F, Fut>(
    queue: Arc<RetryQueue<T>>,
    interval: Duration,
    on_retry_batch: F,
) -> SweeperHandle
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Vec<RetryRecord<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh queue is
        // not swept before anything could expire.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let batch = queue.sweep_expired(Instant::now()).await;
                    if !batch.is_empty() {
                        debug!(count = batch.len(), "re-queued expired retry records");
                        on_retry_batch(batch).await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("sweep loop stopping");
                    break;
                }
            }
        }
    });

    SweeperHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweep_loop_reclaims_and_stops() {
        let queue = Arc::new(RetryQueue::new(Duration::from_millis(20)));
        queue.enqueue("alice", "payload").await;
        queue.dequeue().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_sweep_loop(queue.clone(), Duration::from_millis(50), move |batch| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(batch.len());
            }
        });

        let batch_size = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sweep should fire within the timeout");
        assert_eq!(batch_size, Some(1));

        handle.stop().await;
    }
}
