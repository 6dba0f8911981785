use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Snapshot of the collector health, as logged and reported to the hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub healthy: bool,
    pub last_problem: Option<String>,
    pub transitions: u32,
}

/// Collector-reported operational status. Healthy by default; only domain
/// logic flips it, the transport never does.
#[derive(Clone)]
pub struct Health {
    healthy: Arc<AtomicBool>,
    transitions: Arc<AtomicU32>,
    last_problem: Arc<parking_lot::Mutex<Option<String>>>,
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

impl Health {
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
            transitions: Arc::new(AtomicU32::new(0)),
            last_problem: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::Relaxed) {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            tracing::info!("collector healthy again");
        }
    }

    pub fn mark_unhealthy(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.healthy.swap(false, Ordering::Relaxed) {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%reason, "collector unhealthy");
        }
        *self.last_problem.lock() = Some(reason);
    }

    /// Number of healthy/unhealthy flips since startup.
    pub fn transitions(&self) -> u32 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            healthy: self.is_healthy(),
            last_problem: self.last_problem.lock().clone(),
            transitions: self.transitions(),
        }
    }
}
