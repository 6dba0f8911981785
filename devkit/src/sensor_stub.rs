use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gnhast_client::sensor::SensorSource;
use parking_lot::Mutex;

/// Sensor that replays a script of readings. `None` entries are failed
/// reads. Once the script runs out, the fallback reading is returned, or
/// every read fails if there is none.
///
/// Clones share the script, so a test can keep a handle and push more
/// readings while the collector owns the sensor.
#[derive(Clone)]
pub struct ScriptedSensor<R> {
    script: Arc<Mutex<VecDeque<Option<R>>>>,
    fallback: Arc<Mutex<Option<R>>>,
    reads: Arc<AtomicU32>,
}

impl<R: Clone> ScriptedSensor<R> {
    pub fn new(script: impl IntoIterator<Item = Option<R>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback: Arc::new(Mutex::new(None)),
            reads: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Always returns `reading`.
    pub fn constant(reading: R) -> Self {
        Self::new([]).with_fallback(reading)
    }

    pub fn with_fallback(self, reading: R) -> Self {
        *self.fallback.lock() = Some(reading);
        self
    }

    pub fn push(&self, reading: Option<R>) {
        self.script.lock().push_back(reading);
    }

    pub fn set_fallback(&self, reading: Option<R>) {
        *self.fallback.lock() = reading;
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Clone + Send + 'static> SensorSource for ScriptedSensor<R> {
    type Reading = R;

    async fn try_read(&mut self) -> Option<R> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(reading) => reading,
            None => self.fallback.lock().clone(),
        }
    }
}
