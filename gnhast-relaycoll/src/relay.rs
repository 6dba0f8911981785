use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gnhast_client::device::{Device, DeviceData};
use gnhast_client::hooks::CollectorHooks;
use gnhast_client::{Scheduler, Session};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RelaySpec;
use crate::execution::{execute, render_command};

struct Relay {
    spec: RelaySpec,
    /// Serializes commands for one relay; holds the last value applied
    applied: Mutex<Option<DeviceData>>,
}

/// Runs the relay command for every change the hub requests. Commands run
/// on the scheduler so the read loop is never blocked on a child process.
pub struct RelayHooks {
    relays: HashMap<String, Arc<Relay>>,
    scheduler: Scheduler,
}

impl RelayHooks {
    pub fn new(specs: &[RelaySpec], scheduler: Scheduler) -> Self {
        let relays = specs
            .iter()
            .map(|spec| {
                let relay = Relay {
                    spec: spec.clone(),
                    applied: Mutex::new(None),
                };
                (spec.uid.clone(), Arc::new(relay))
            })
            .collect();
        Self { relays, scheduler }
    }
}

/// Applies `data` to the relay and reports the outcome to the hub.
async fn switch(session: Session, relay: Arc<Relay>, data: DeviceData) {
    let uid = &relay.spec.uid;
    let mut applied = relay.applied.lock().await;

    let argv = match render_command(&relay.spec.command, uid, &data.encode_value()) {
        Ok(argv) => argv,
        Err(e) => {
            warn!(%uid, error = %e, "cannot build relay command");
            session.health().mark_unhealthy(format!("relay {uid}: {e}"));
            return;
        }
    };
    let result = execute(&argv, relay.spec.timeout()).await;

    if result.success {
        info!(%uid, value = data.value(), ms = result.execution_time_ms, "relay switched");
        debug!(%uid, output = %result.output.trim_end(), "relay command output");
        match session.publish_data(uid, data) {
            Ok(_) => {
                *applied = Some(data);
                session.health().mark_healthy();
            }
            Err(e) => warn!(%uid, error = %e, "cannot report relay state"),
        }
        return;
    }

    let reason = result
        .error
        .clone()
        .unwrap_or_else(|| format!("exit code {:?}: {}", result.exit_code, result.output.trim_end()));
    warn!(%uid, %reason, "relay command failed");
    session.health().mark_unhealthy(format!("relay {uid}: {reason}"));
    // the registry already holds the requested value
    if let Some(previous) = *applied {
        if let Err(e) = session.registry().set_data(uid, previous, session.now()) {
            debug!(%uid, error = %e, "cannot restore relay state");
        }
    }
}

#[async_trait]
impl CollectorHooks for RelayHooks {
    async fn on_change(&self, session: &Session, device: &Device) {
        let Some(relay) = self.relays.get(&device.uid) else {
            debug!(uid = %device.uid, "change for a device we do not drive");
            return;
        };
        let Some(data) = device.data else {
            warn!(uid = %device.uid, "change without a value");
            return;
        };
        if self.scheduler.is_cancelled() {
            warn!(uid = %device.uid, "shutting down, change dropped");
            return;
        }
        self.scheduler.spawn(switch(session.clone(), relay.clone(), data));
    }
}
