use async_trait::async_trait;

use crate::alarm::Alarm;
use crate::device::Device;
use crate::session::Session;

/// Extension points a collector installs on its session. Every slot is a
/// no-op by default.
///
/// Hooks run on the read loop, after the message has been applied to the
/// registry. Anything slow belongs in a spawned task.
#[async_trait]
pub trait CollectorHooks: Send + Sync {
    /// A device was announced by the hub.
    async fn on_register(&self, _session: &Session, _device: &Device) {}

    /// A subscribed device has a new value.
    async fn on_update(&self, _session: &Session, _device: &Device) {}

    /// The hub asks this collector to act on a device it owns. `device.data`
    /// holds the requested value.
    async fn on_change(&self, _session: &Session, _device: &Device) {}

    async fn on_alarm(&self, _session: &Session, _alarm: &Alarm) {}
}

/// Hooks for a session that only pushes values
pub struct NoHooks;

impl CollectorHooks for NoHooks {}
