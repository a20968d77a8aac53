//! Bounded pool for the units of work the orchestrator hands off.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

/// Runs submitted futures with at most `size` in flight and reports each
/// one's result exactly once on the completion channel.
///
/// A unit that panics is reported through its `on_lost` mapping instead, so
/// the coordinator always hears back.
pub struct WorkerPool<M> {
    permits: Arc<Semaphore>,
    size: usize,
    reports: mpsc::UnboundedSender<M>,
}

impl<M: Send + 'static> WorkerPool<M> {
    /// Create the pool and the receiver its completions arrive on.
    pub fn new(size: usize) -> (Self, mpsc::UnboundedReceiver<M>) {
        let size = size.max(1);
        let (reports, completions) = mpsc::unbounded_channel();
        let pool = Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            reports,
        };
        (pool, completions)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Get number of idle workers.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queue `work`. Returns immediately; the result arrives on the channel.
    pub fn submit<F, L>(&self, label: &'static str, work: F, on_lost: L)
    where
        F: Future<Output = M> + Send + 'static,
        L: FnOnce(String) -> M + Send + 'static,
    {
        let permits = self.permits.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let report = match permits.acquire_owned().await {
                Ok(_permit) => match tokio::spawn(work).await {
                    Ok(value) => value,
                    Err(e) => {
                        error!(unit = label, error = %e, "worker lost");
                        on_lost(e.to_string())
                    }
                },
                Err(e) => on_lost(e.to_string()),
            };

            if reports.send(report).is_err() {
                debug!(unit = label, "completion dropped, coordinator gone");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn each_unit_reports_once() {
        let (pool, mut rx) = WorkerPool::<u32>::new(2);
        for n in 0..5 {
            pool.submit("n", async move { n * 10 }, |_| u32::MAX);
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 10, 20, 30, 40]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_unit_is_reported_as_lost() {
        let (pool, mut rx) = WorkerPool::<Result<u32, String>>::new(1);
        pool.submit(
            "boom",
            async {
                if true {
                    panic!("unit exploded");
                }
                Ok(0)
            },
            Err,
        );
        let report = rx.recv().await.unwrap();
        assert!(report.unwrap_err().contains("panic"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let (pool, mut rx) = WorkerPool::<()>::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            pool.submit(
                "sleep",
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                },
                |_| (),
            );
        }
        for _ in 0..6 {
            rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn zero_size_is_clamped() {
        let (pool, _rx) = WorkerPool::<()>::new(0);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 1);
    }
}
