//! One live hub session
//!
//! The session owns the shared state (client handle, registry, health, clock)
//! and drives the single read loop over an [`EventLoop`]. It is cheap to
//! clone so hooks and pollers can keep their own copy.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Connector, Event, EventLoop, HubClient};
use crate::clock::{Clock, SystemClock};
use crate::codec::{Message, Verb};
use crate::device::{Device, DeviceData};
use crate::error::{Error, Result};
use crate::health::Health;
use crate::hooks::CollectorHooks;
use crate::registry::DeviceRegistry;

/// Upper bound for flushing the disconnect notice on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a discovery round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Complete,
    Cancelled,
}

#[derive(Clone)]
pub struct Session {
    client: HubClient,
    registry: DeviceRegistry,
    health: Health,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(client: HubClient) -> Self {
        Self {
            client,
            registry: DeviceRegistry::new(),
            health: Health::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn client(&self) -> &HubClient {
        &self.client
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Adds a device this collector owns. Call before [`Session::start`].
    pub fn declare(&self, device: Device) -> Device {
        self.registry.declare(device)
    }

    /// Session preamble: client identification, then one registration per
    /// owned device.
    pub fn start(&self, client_name: &str) -> Result<()> {
        self.client.identify(client_name)?;
        let owned = self.registry.owned();
        for device in &owned {
            self.client.register(device)?;
        }
        info!(client = client_name, devices = owned.len(), "session started");
        Ok(())
    }

    /// Stores a local reading and pushes it to the hub.
    pub fn publish_value(&self, uid: &str, value: f64) -> Result<Device> {
        let device = self.registry.set_value(uid, value, self.now())?;
        self.client.update(&device)?;
        Ok(device)
    }

    pub fn publish_data(&self, uid: &str, data: DeviceData) -> Result<Device> {
        let device = self.registry.set_data(uid, data, self.now())?;
        self.client.update(&device)?;
        Ok(device)
    }

    /// Requests the device list (optionally one uid) and processes inbound
    /// messages until the end-of-dump marker. Stops early, without sending
    /// anything, when `shutdown` is cancelled; the caller still owes the hub
    /// a [`Session::close`].
    pub async fn discover<C, H>(
        &self,
        eventloop: &mut EventLoop<C>,
        hooks: &H,
        uid: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Result<Discovery>
    where
        C: Connector,
        H: CollectorHooks + ?Sized,
    {
        self.client.list_devices(uid)?;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(filter = ?uid, "shutdown during discovery");
                    return Ok(Discovery::Cancelled);
                }
                event = eventloop.poll() => event?,
            };
            match event {
                Event::Incoming(Message::EndDump) => break,
                Event::Incoming(message) => {
                    if self.dispatch(message, hooks).await.is_break() {
                        return Err(Error::ConnectionClosed);
                    }
                }
                Event::Outgoing(_) => {}
                Event::Reconnected { attempt } => info!(attempt, "reconnected during discovery"),
            }
        }
        debug!(filter = ?uid, known = self.registry.len(), "discovery complete");
        Ok(Discovery::Complete)
    }

    /// Read loop. Returns after `shutdown` is cancelled or the hub asks us
    /// to leave, always sending the disconnect notice first. Transport
    /// failures the reconnect policy cannot recover are returned.
    pub async fn run<C, H>(
        &self,
        eventloop: &mut EventLoop<C>,
        hooks: &H,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        C: Connector,
        H: CollectorHooks + ?Sized,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => match event? {
                    Event::Incoming(message) => {
                        if self.dispatch(message, hooks).await.is_break() {
                            shutdown.cancel();
                            break;
                        }
                    }
                    Event::Outgoing(_) => {}
                    Event::Reconnected { attempt } => info!(attempt, "session resumed"),
                },
            }
        }
        self.close(eventloop).await
    }

    /// Sends `disconnect` and waits until it has been written.
    pub async fn close<C: Connector>(&self, eventloop: &mut EventLoop<C>) -> Result<()> {
        if !eventloop.is_connected() {
            return Ok(());
        }
        self.client.disconnect()?;

        let drain = async {
            loop {
                if let Event::Outgoing(Verb::Disconnect) = eventloop.poll().await? {
                    return Ok::<_, Error>(());
                }
            }
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await {
            Ok(Ok(())) => {
                info!("disconnected from hub");
                Ok(())
            }
            Ok(Err(Error::ConnectionClosed | Error::Connection(_))) => {
                debug!("hub closed the connection first");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(SHUTDOWN_TIMEOUT)),
        }
    }

    /// Applies one inbound message and fires the matching hook. Breaks when
    /// the hub ends the session.
    pub async fn dispatch<H>(&self, message: Message, hooks: &H) -> ControlFlow<()>
    where
        H: CollectorHooks + ?Sized,
    {
        match message {
            Message::Register(reg) => {
                let device = self.registry.apply_registration(&reg);
                debug!(uid = %device.uid, name = %device.name, "device registered");
                hooks.on_register(self, &device).await;
            }
            Message::Update(upd) => match self.registry.apply_update(&upd, self.now()) {
                Ok(device) => hooks.on_update(self, &device).await,
                Err(e) => warn!(uid = %upd.uid, error = %e, "update for unknown device ignored"),
            },
            Message::Change(chg) => match self.registry.apply_update(&chg, self.now()) {
                Ok(device) => {
                    info!(uid = %device.uid, value = chg.data.value(), "change requested");
                    hooks.on_change(self, &device).await;
                }
                Err(e) => warn!(uid = %chg.uid, error = %e, "change for unknown device ignored"),
            },
            Message::Alarm(alarm) => hooks.on_alarm(self, &alarm).await,
            Message::Ping => {
                if let Err(e) = self.client.imalive(self.health.is_healthy()) {
                    warn!(error = %e, "cannot answer ping");
                }
            }
            Message::Die => {
                info!("hub asked the collector to exit");
                return ControlFlow::Break(());
            }
            Message::Disconnect => {
                info!("hub closed the session");
                return ControlFlow::Break(());
            }
            Message::EndDump => debug!("end of dump"),
            other => debug!(verb = other.verb().keyword(), "ignoring message"),
        }
        ControlFlow::Continue(())
    }
}
