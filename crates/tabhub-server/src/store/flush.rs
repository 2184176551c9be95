//! Debounced persistence shared by the durable stores.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::error;

use tabhub_core::limits::SAVE_DEBOUNCE;
use tabhub_core::HubResult;

enum Command {
    Touch,
    Flush(oneshot::Sender<()>),
}

/// Coalesces bursts of mutations into one deferred write.
///
/// [`schedule`](Self::schedule) arms (or re-arms) the debounce deadline;
/// [`flush_now`](Self::flush_now) writes immediately, superseding any
/// pending deadline, and completes only after the write finished. The
/// writer runs on its own task so store locks are never held across disk
/// I/O from a request path.
#[derive(Clone)]
pub struct Debouncer {
    tx: mpsc::Sender<Command>,
}

impl Debouncer {
    /// Spawn the flush worker around `write`.
    pub fn spawn<F, Fut>(write: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = HubResult<()>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Command>(16);

        tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                let wake = deadline.unwrap_or_else(far_future);
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(Command::Touch) => {
                            deadline = Some(Instant::now() + SAVE_DEBOUNCE);
                        }
                        Some(Command::Flush(done)) => {
                            deadline = None;
                            if let Err(e) = write().await {
                                error!(error = %e, "store flush failed");
                            }
                            let _ = done.send(());
                        }
                        None => {
                            // Store dropped; write anything still pending.
                            if deadline.is_some() {
                                if let Err(e) = write().await {
                                    error!(error = %e, "store flush failed");
                                }
                            }
                            break;
                        }
                    },
                    _ = sleep_until(wake), if deadline.is_some() => {
                        deadline = None;
                        if let Err(e) = write().await {
                            error!(error = %e, "store flush failed");
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Note a mutation; the write lands after the debounce window unless
    /// another mutation re-arms it first.
    pub fn schedule(&self) {
        // A full queue already has a touch in flight.
        let _ = self.tx.try_send(Command::Touch);
    }

    /// Flush immediately and wait for the write to complete.
    pub async fn flush_now(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_debouncer() -> (Debouncer, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        let debouncer = Debouncer::spawn(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (debouncer, writes)
    }

    #[tokio::test]
    async fn burst_of_schedules_writes_once() {
        let (debouncer, writes) = counting_debouncer();
        for _ in 0..10 {
            debouncer.schedule();
        }
        tokio::time::sleep(SAVE_DEBOUNCE + Duration::from_millis(200)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_now_supersedes_pending_deadline() {
        let (debouncer, writes) = counting_debouncer();
        debouncer.schedule();
        debouncer.flush_now().await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        // The deadline was cleared; no second write follows.
        tokio::time::sleep(SAVE_DEBOUNCE + Duration::from_millis(200)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_now_without_mutations_still_writes() {
        let (debouncer, writes) = counting_debouncer();
        debouncer.flush_now().await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }
}
