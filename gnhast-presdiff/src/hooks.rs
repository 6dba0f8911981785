use async_trait::async_trait;
use gnhast_client::device::Device;
use gnhast_client::hooks::CollectorHooks;
use gnhast_client::monitor::CorrelationMonitor;
use gnhast_client::Session;
use tracing::{debug, info, warn};

/// Subscribes to both feeds as they are announced and recomputes the
/// differential on every update.
pub struct PresdiffHooks {
    monitor: CorrelationMonitor,
    rate: u32,
}

impl PresdiffHooks {
    pub fn new(monitor: CorrelationMonitor, rate: u32) -> Self {
        Self { monitor, rate }
    }
}

#[async_trait]
impl CollectorHooks for PresdiffHooks {
    async fn on_register(&self, session: &Session, device: &Device) {
        if !self.monitor.watches(&device.uid) {
            return;
        }
        info!(uid = %device.uid, rate = self.rate, "got feed device, asking for feed");
        let client = session.client();
        let subscribed = client
            .feed(&device.uid, self.rate)
            .and_then(|()| client.ask(&device.uid, false));
        if let Err(e) = subscribed {
            warn!(uid = %device.uid, error = %e, "cannot subscribe to feed");
        }
    }

    async fn on_update(&self, session: &Session, device: &Device) {
        debug!(uid = %device.uid, value = ?device.value(), "got data");
        self.monitor.on_feed_update(session, &device.uid);
    }
}
