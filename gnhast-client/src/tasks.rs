//! Periodic tasks with ordered shutdown
//!
//! Every task is tracked. Cancellation stops new ticks; a step already
//! running is allowed to finish.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Clone)]
pub struct Scheduler {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    /// Tasks stop when `parent` or this scheduler is cancelled.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs `step` now and then every `period` until cancelled.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut step: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                step().await;
            }
            debug!(task = name, "periodic task stopped");
        });
    }

    /// Tracks a one-shot task so shutdown waits for it.
    pub fn spawn<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels, then waits for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// A token cancelled once this scheduler is cancelled and every task has
    /// finished. The hub read loop stops on it, so in-flight steps can still
    /// push their values before the disconnect.
    pub fn drained(&self) -> CancellationToken {
        let drained = CancellationToken::new();
        let done = drained.clone();
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.token.cancelled().await;
            scheduler.shutdown().await;
            done.cancel();
        });
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let root = CancellationToken::new();
        let scheduler = Scheduler::new(&root);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        scheduler.spawn_periodic("counter", Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // first tick at t=0, then t=5, 10, 15, 20
        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);

        root.cancel();
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_step_completes() {
        let root = CancellationToken::new();
        let scheduler = Scheduler::new(&root);
        let finished = Arc::new(AtomicU32::new(0));

        let done = finished.clone();
        scheduler.spawn_periodic("slow", Duration::from_secs(10), move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_waits_for_steps() {
        let root = CancellationToken::new();
        let scheduler = Scheduler::new(&root);
        let drained = scheduler.drained();
        let finished = Arc::new(AtomicU32::new(0));

        let done = finished.clone();
        scheduler.spawn_periodic("slow", Duration::from_secs(10), move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        root.cancel();
        assert!(!drained.is_cancelled());
        drained.cancelled().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
