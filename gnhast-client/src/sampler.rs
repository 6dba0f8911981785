//! Stabilization sampler
//!
//! Samples a source once per tick for a fixed warm-up, then reduces the
//! trailing window of good samples to a baseline. The sampler is consumed by
//! [`Stabilizer::run`], so a baseline is computed at most once.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sensor::SensorSource;

pub const DEFAULT_WINDOW: usize = 50;
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub value: f64,
    /// Good samples collected during warm-up
    pub sample_count: usize,
    pub window: usize,
    /// Fewer samples than `window` were available; the mean covers all of them
    pub degraded: bool,
}

/// Mean of the last `min(window, samples.len())` samples. `None` when there
/// is nothing to average.
pub fn compute_baseline(samples: &[f64], window: usize) -> Option<Baseline> {
    if samples.is_empty() || window == 0 {
        return None;
    }
    let tail = &samples[samples.len().saturating_sub(window)..];
    Some(Baseline {
        value: tail.iter().sum::<f64>() / tail.len() as f64,
        sample_count: samples.len(),
        window,
        degraded: samples.len() < window,
    })
}

/// Result of a warm-up phase
#[derive(Debug, Clone, PartialEq)]
pub struct Stabilization {
    pub baseline: Option<Baseline>,
    pub samples: Vec<f64>,
    pub failed_reads: u32,
    /// Shutdown interrupted the warm-up; no baseline was computed
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct Stabilizer {
    warmup: Duration,
    tick: Duration,
    window: usize,
}

impl Stabilizer {
    pub fn new(warmup: Duration) -> Self {
        Self {
            warmup,
            tick: DEFAULT_TICK,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Number of sampling ticks in the warm-up.
    pub fn ticks(&self) -> u64 {
        if self.tick.is_zero() {
            return 0;
        }
        self.warmup.as_millis().div_ceil(self.tick.as_millis()) as u64
    }

    /// Samples `source` for the warm-up duration. `extract` picks the value
    /// to stabilize from each reading; failed reads are counted and skipped.
    pub async fn run<S, F>(self, source: &mut S, mut extract: F, cancel: &CancellationToken) -> Stabilization
    where
        S: SensorSource + ?Sized,
        F: FnMut(&S::Reading) -> Option<f64>,
    {
        let ticks = self.ticks();
        info!(ticks, window = self.window, "warm-up started");

        let mut samples = Vec::with_capacity(ticks as usize);
        let mut failed_reads = 0u32;
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for tick in 0..ticks {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(tick, "warm-up interrupted");
                    return Stabilization { baseline: None, samples, failed_reads, cancelled: true };
                }
                _ = ticker.tick() => {}
            }
            match source.try_read().await.as_ref().and_then(&mut extract) {
                Some(value) => {
                    debug!(tick, value, "warm-up sample");
                    samples.push(value);
                }
                None => failed_reads += 1,
            }
        }

        // let the final tick's interval elapse before handing over
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = ticker.tick() => {}
        }

        let baseline = compute_baseline(&samples, self.window);
        match &baseline {
            Some(b) if b.degraded => warn!(
                samples = b.sample_count,
                window = b.window,
                baseline = b.value,
                "baseline computed from fewer samples than the window"
            ),
            Some(b) => info!(baseline = b.value, samples = b.sample_count, "baseline computed"),
            None => warn!(failed_reads, "no good samples during warm-up, no baseline"),
        }

        Stabilization {
            baseline,
            samples,
            failed_reads,
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Yields `1.0, 2.0, ...`, failing every `fail_every`-th read.
    struct Counting {
        reads: u32,
        fail_every: u32,
    }

    #[async_trait]
    impl SensorSource for Counting {
        type Reading = f64;

        async fn try_read(&mut self) -> Option<f64> {
            self.reads += 1;
            if self.fail_every != 0 && self.reads % self.fail_every == 0 {
                return None;
            }
            Some(self.reads as f64)
        }
    }

    #[test]
    fn test_baseline_over_last_window() {
        let samples: Vec<f64> = (1..=60).map(f64::from).collect();
        let b = compute_baseline(&samples, 50).unwrap();
        // mean of 11..=60
        assert_eq!(b.value, 35.5);
        assert!(!b.degraded);
        assert_eq!(b.sample_count, 60);
    }

    #[test]
    fn test_baseline_with_short_history() {
        let b = compute_baseline(&[2.0, 4.0, 9.0], 50).unwrap();
        assert_eq!(b.value, 5.0);
        assert!(b.degraded);
        assert!(compute_baseline(&[], 50).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_samples_once_per_tick() {
        let mut source = Counting { reads: 0, fail_every: 0 };
        let start = tokio::time::Instant::now();
        let result = Stabilizer::new(Duration::from_secs(300))
            .run(&mut source, |v| Some(*v), &CancellationToken::new())
            .await;

        assert_eq!(source.reads, 300);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        let baseline = result.baseline.unwrap();
        // mean of 251..=300
        assert_eq!(baseline.value, 275.5);
        assert!(!result.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_are_skipped() {
        let mut source = Counting { reads: 0, fail_every: 2 };
        let result = Stabilizer::new(Duration::from_secs(20))
            .run(&mut source, |v| Some(*v), &CancellationToken::new())
            .await;

        assert_eq!(result.failed_reads, 10);
        assert_eq!(result.samples, vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0, 17.0, 19.0]);
        let baseline = result.baseline.unwrap();
        assert!(baseline.degraded);
        assert_eq!(baseline.value, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_warmup() {
        let mut source = Counting { reads: 0, fail_every: 0 };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4500)).await;
            trigger.cancel();
        });

        let result = Stabilizer::new(Duration::from_secs(300))
            .run(&mut source, |v| Some(*v), &cancel)
            .await;
        assert!(result.cancelled);
        assert!(result.baseline.is_none());
        assert_eq!(result.samples.len(), 5);
    }
}
