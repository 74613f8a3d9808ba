//! Flush scheduling: debounced and periodic.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use envsync_common::Result;

/// What caused a background flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The debounce window elapsed after the last request.
    Debounce,
    /// The periodic timer fired.
    Periodic,
}

/// Requests accepted by the scheduler task.
#[derive(Debug)]
enum FlushRequest {
    /// (Re)start the debounce window.
    Debounce,
    /// Stop the task.
    Shutdown,
}

/// Sender side of the scheduler, held by the store.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    request_tx: mpsc::UnboundedSender<FlushRequest>,
}

impl FlushScheduler {
    /// Create a scheduler.
    ///
    /// `debounce` is the quiet period between the last request and the
    /// flush it triggers. With `interval` set, the task also flushes on
    /// that period, starting one period from now.
    pub fn new(debounce: Duration, interval: Option<Duration>) -> (Self, FlushSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let scheduler = Self { request_tx };
        let handle = FlushSchedulerHandle {
            debounce,
            interval: interval.filter(|d| !d.is_zero()),
            request_rx,
        };

        (scheduler, handle)
    }

    /// Ask for a flush once the debounce window passes without further
    /// requests.
    pub fn request_flush(&self) {
        if self.request_tx.send(FlushRequest::Debounce).is_err() {
            debug!("Flush requested after scheduler stopped");
        }
    }

    /// Stop the task. Pending debounced flushes are discarded.
    pub fn shutdown(&self) {
        let _ = self.request_tx.send(FlushRequest::Shutdown);
    }
}

/// Receiver side of the scheduler; runs the background loop.
#[derive(Debug)]
pub struct FlushSchedulerHandle {
    debounce: Duration,
    interval: Option<Duration>,
    request_rx: mpsc::UnboundedReceiver<FlushRequest>,
}

impl FlushSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// This should be spawned in a tokio task. `flush_fn` is called for
    /// every trigger; its errors are logged and the loop keeps going.
    /// [`FlushOutcome::Stop`] ends the loop.
    pub async fn run<F, Fut>(mut self, flush_fn: F)
    where
        F: Fn(FlushTrigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlushOutcome> + Send,
    {
        let mut periodic = self.interval.map(|period| {
            let mut ticker: Interval = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut deadline: Option<Instant> = None;

        info!(
            "Flush scheduler started (debounce {:?}, interval {:?})",
            self.debounce, self.interval
        );

        loop {
            let trigger = tokio::select! {
                biased;

                request = self.request_rx.recv() => match request {
                    Some(FlushRequest::Debounce) => {
                        deadline = Some(Instant::now() + self.debounce);
                        continue;
                    }
                    Some(FlushRequest::Shutdown) | None => {
                        info!("Flush scheduler shutting down");
                        break;
                    }
                },

                _ = Self::wait_for_deadline(deadline) => {
                    deadline = None;
                    FlushTrigger::Debounce
                }

                _ = Self::wait_for_periodic(&mut periodic) => FlushTrigger::Periodic,
            };

            debug!("Triggering {:?} flush", trigger);
            match flush_fn(trigger).await {
                FlushOutcome::Done(Ok(())) => {}
                FlushOutcome::Done(Err(e)) => {
                    warn!("{:?} flush failed: {}", trigger, e);
                }
                FlushOutcome::Stop => {
                    debug!("Flush target gone, stopping scheduler");
                    break;
                }
            }
        }
    }

    async fn wait_for_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    async fn wait_for_periodic(interval: &mut Option<Interval>) {
        match interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

/// Result of one scheduled flush.
#[derive(Debug)]
pub enum FlushOutcome {
    /// The flush ran (or had nothing to do).
    Done(Result<()>),
    /// The flush target no longer exists.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsync_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn spawn_counting(
        handle: FlushSchedulerHandle,
    ) -> (Arc<Mutex<Vec<FlushTrigger>>>, tokio::task::JoinHandle<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let task = tokio::spawn(async move {
            handle
                .run(move |trigger| {
                    let seen = seen_clone.clone();
                    async move {
                        seen.lock().unwrap().push(trigger);
                        FlushOutcome::Done(Ok(()))
                    }
                })
                .await;
        });
        (seen, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_requests() {
        let (scheduler, handle) = FlushScheduler::new(Duration::from_millis(1000), None);
        let (seen, task) = spawn_counting(handle);

        for _ in 0..5 {
            scheduler.request_flush();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*seen.lock().unwrap(), vec![FlushTrigger::Debounce]);

        scheduler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let (scheduler, handle) =
            FlushScheduler::new(Duration::from_millis(1000), Some(Duration::from_secs(30)));
        let (seen, task) = spawn_counting(handle);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(32)).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![FlushTrigger::Periodic, FlushTrigger::Periodic]
        );

        scheduler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_debounce() {
        let (scheduler, handle) = FlushScheduler::new(Duration::from_millis(1000), None);
        let (seen, task) = spawn_counting(handle);

        scheduler.request_flush();
        scheduler.shutdown();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_loop() {
        let (scheduler, handle) = FlushScheduler::new(Duration::from_millis(10), None);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let task = tokio::spawn(async move {
            handle
                .run(move |_| {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        FlushOutcome::Done(Err(Error::Storage("disk full".to_string())))
                    }
                })
                .await;
        });

        scheduler.request_flush();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.request_flush();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_outcome_ends_loop() {
        let (scheduler, handle) = FlushScheduler::new(Duration::ZERO, None);
        let task = tokio::spawn(handle.run(|_| async { FlushOutcome::Stop }));

        scheduler.request_flush();
        task.await.unwrap();
    }
}
