//! Serialized, throttled execution of outbound network calls.
//!
//! Every remote call goes through one FIFO queue drained by a single worker
//! task. The worker runs one operation at a time and, when more work is
//! waiting, sleeps for the configured request delay before taking the next.
//! The delay is never applied before the first item of a burst.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::Settings;
use crate::error::RemoteError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct RequestSequencer {
    tx: mpsc::UnboundedSender<Job>,
    /// Taken by the worker when it starts; `None` once running.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    settings: watch::Receiver<Settings>,
    queued: Arc<AtomicUsize>,
}

impl RequestSequencer {
    pub fn new(settings: watch::Receiver<Settings>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            settings,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Operations waiting to start (the running one excluded).
    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Append `operation` to the queue.
    ///
    /// The position in the queue is fixed when this is called, not when the
    /// returned future is first polled. The operation's own error is delivered
    /// through the returned future and does not stop the queue. Must be called
    /// from within a tokio runtime.
    pub fn enqueue<F, Fut, T>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, RemoteError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let settings = self.settings.clone();
        let queued = self.queued.clone();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                queued.fetch_sub(1, Ordering::SeqCst);
                let timeout = settings.borrow().request_timeout();
                let run = async move {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, operation())
                            .await
                            .unwrap_or(Err(RemoteError::TimedOut(limit))),
                        None => operation().await,
                    }
                };
                let result = AssertUnwindSafe(run)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(RemoteError::Api("operation panicked".to_string())));
                if let Err(e) = &result {
                    tracing::debug!("queued operation failed: {}", e);
                }
                // Caller may have gone away; the outcome is simply dropped
                let _ = done_tx.send(result);
            })
        });

        self.queued.fetch_add(1, Ordering::SeqCst);
        let sent = self.tx.send(job).is_ok();
        if sent {
            tracing::trace!(depth = self.queue_len(), "operation enqueued");
            self.ensure_worker();
        } else {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }

        async move {
            if !sent {
                return Err(RemoteError::SequencerClosed);
            }
            done_rx
                .await
                .unwrap_or(Err(RemoteError::SequencerClosed))
        }
    }

    /// Start the worker if it is not running yet. Idempotent.
    fn ensure_worker(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        tracing::debug!("starting request worker");
        tokio::spawn(run_worker(rx, self.settings.clone()));
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, settings: watch::Receiver<Settings>) {
    while let Some(job) = rx.recv().await {
        job().await;

        if !rx.is_empty() {
            let delay = settings.borrow().request_delay();
            tokio::time::sleep(delay).await;
        }
    }
    tracing::debug!("request worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsStore;
    use std::time::Duration;
    use tokio::time::Instant;

    fn sequencer(delay_ms: u64) -> (SettingsStore, RequestSequencer) {
        let store = SettingsStore::in_memory(Settings::custom(delay_ms, 10, 60_000));
        let sequencer = RequestSequencer::new(store.subscribe());
        (store, sequencer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_delay_between_items() {
        let (_store, sequencer) = sequencer(100);
        let log: Arc<Mutex<Vec<(&'static str, Instant, Instant)>>> = Arc::default();
        let started = Instant::now();

        let mut futures = Vec::new();
        for label in ["A", "B", "C"] {
            let log = log.clone();
            futures.push(sequencer.enqueue(move || async move {
                let begin = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().push((label, begin, Instant::now()));
                Ok::<_, RemoteError>(label)
            }));
        }
        let results = futures::future::join_all(futures).await;
        let labels: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(labels, vec!["A", "B", "C"]);

        let log = log.lock();
        let order: Vec<_> = log.iter().map(|(l, _, _)| *l).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        // No delay before the first item
        assert_eq!(log[0].1, started);
        for pair in log.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].2) >= Duration::from_millis(100));
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_in_flight() {
        let (_store, sequencer) = sequencer(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..8)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                sequencer.enqueue(move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RemoteError>(i)
                })
            })
            .collect();
        futures::future::join_all(futures).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(sequencer.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_queue() {
        let (_store, sequencer) = sequencer(10);
        let first = sequencer.enqueue(|| async { Err::<u32, _>(RemoteError::NotFound) });
        let second = sequencer.enqueue(|| async { Ok::<_, RemoteError>(2u32) });

        assert!(matches!(first.await, Err(RemoteError::NotFound)));
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_operation_times_out() {
        let store = SettingsStore::in_memory(Settings {
            request_timeout_ms: 1_000,
            ..Settings::custom(0, 10, 60_000)
        });
        let sequencer = RequestSequencer::new(store.subscribe());

        let hung = sequencer.enqueue(|| futures::future::pending::<Result<(), RemoteError>>());
        let next = sequencer.enqueue(|| async { Ok::<_, RemoteError>("after") });

        assert!(matches!(hung.await, Err(RemoteError::TimedOut(d)) if d == Duration::from_secs(1)));
        assert_eq!(next.await.unwrap(), "after");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_when_queue_was_drained() {
        let (_store, sequencer) = sequencer(500);
        sequencer
            .enqueue(|| async { Ok::<_, RemoteError>(()) })
            .await
            .unwrap();

        let before = Instant::now();
        let started_at = sequencer
            .enqueue(|| async { Ok::<_, RemoteError>(Instant::now()) })
            .await
            .unwrap();
        assert_eq!(started_at, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_operation_is_reported() {
        let (_store, sequencer) = sequencer(0);
        let boom = sequencer.enqueue(|| async {
            if true {
                panic!("boom");
            }
            Ok::<_, RemoteError>(())
        });
        let next = sequencer.enqueue(|| async { Ok::<_, RemoteError>(1) });

        assert!(matches!(boom.await, Err(RemoteError::Api(_))));
        assert_eq!(next.await.unwrap(), 1);
    }
}
