use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// One measurement for a downstream time-series store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, point: &Point) -> Result<()>;
}

/// Writes `point`, logging instead of propagating a failure. Returns
/// whether the write went through.
pub async fn write_best_effort<S: Sink + ?Sized>(sink: &S, point: &Point) -> bool {
    match sink.write(point).await {
        Ok(()) => true,
        Err(e) => {
            warn!(measurement = %point.measurement, error = %e, "sink write failed, point dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::TimeZone;

    struct Broken;

    #[async_trait]
    impl Sink for Broken {
        async fn write(&self, _point: &Point) -> Result<()> {
            Err(Error::Sink("database unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let point = Point::new("temp", Utc.timestamp_opt(100, 0).unwrap())
            .tag("id", "t1")
            .field("data", 21.5);
        assert!(!write_best_effort(&Broken, &point).await);
    }
}
