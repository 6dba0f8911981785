//! Correlation/health monitor
//!
//! Combines a reference feed and a comparison feed into a derived device
//! (`reference - comparison`). The derived value is only recomputed while
//! both feeds are fresh; otherwise the collector is marked unhealthy and the
//! previous derived value is left as it was.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub reference: String,
    pub comparison: String,
    pub derived: String,
    pub max_skew: Duration,
}

#[derive(Debug, Clone)]
pub struct CorrelationMonitor {
    correlation: Correlation,
}

impl CorrelationMonitor {
    /// Rejects blank or repeated uids and a non-positive skew bound.
    pub fn new(correlation: Correlation) -> Result<Self> {
        let Correlation {
            reference,
            comparison,
            derived,
            max_skew,
        } = &correlation;

        for (name, uid) in [("reference", reference), ("comparison", comparison), ("derived", derived)] {
            if uid.trim().is_empty() {
                return Err(Error::Configuration(format!("{name} uid is not set")));
            }
        }
        if reference == comparison || derived == reference || derived == comparison {
            return Err(Error::Configuration(format!(
                "correlation uids must differ: {reference}, {comparison}, {derived}"
            )));
        }
        if *max_skew <= Duration::zero() {
            return Err(Error::Configuration("max skew must be positive".to_string()));
        }

        Ok(Self { correlation })
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    /// Whether `uid` is one of the two input feeds.
    pub fn watches(&self, uid: &str) -> bool {
        uid == self.correlation.reference || uid == self.correlation.comparison
    }

    /// Recomputes the derived device from the current feed records and
    /// stores it. Errors leave the registry untouched.
    pub fn evaluate(&self, registry: &DeviceRegistry, now: DateTime<Utc>) -> Result<Device> {
        let c = &self.correlation;
        let reference = self.fresh_feed(registry, &c.reference, now)?;
        let comparison = self.fresh_feed(registry, &c.comparison, now)?;

        let derived = reference - comparison;
        debug!(reference, comparison, derived, "derived value computed");
        registry.set_value(&c.derived, derived, now)
    }

    fn fresh_feed(&self, registry: &DeviceRegistry, uid: &str, now: DateTime<Utc>) -> Result<f64> {
        let device = registry
            .find_by_uid(uid)
            .ok_or_else(|| Error::Lookup(uid.to_string()))?;
        let (Some(value), Some(age)) = (device.value(), device.age(now)) else {
            return Err(Error::NoData(uid.to_string()));
        };
        if age > self.correlation.max_skew {
            return Err(Error::Staleness {
                uid: uid.to_string(),
                age_secs: age.num_seconds(),
                max_skew_secs: self.correlation.max_skew.num_seconds(),
            });
        }
        Ok(value)
    }

    /// Reacts to an update of `uid`: on success the derived value is pushed
    /// to the hub and health is restored; on failure health goes false.
    /// Updates of unrelated devices are ignored.
    pub fn on_feed_update(&self, session: &Session, uid: &str) -> Option<Device> {
        if !self.watches(uid) {
            return None;
        }

        match self.evaluate(session.registry(), session.now()) {
            Ok(derived) => {
                if let Err(e) = session.client().update(&derived) {
                    warn!(uid = %derived.uid, error = %e, "cannot push derived value");
                }
                session.health().mark_healthy();
                Some(derived)
            }
            Err(e) => {
                warn!(trigger = uid, error = %e, "derived value not computed");
                session.health().mark_unhealthy(e.to_string());
                None
            }
        }
    }
}
