/*!
Test harness for collectors

Wires a [`Session`] to a [`MockHub`]:
- manual clock, so staleness is driven by the test
- recording hooks to assert on what the session dispatched
- background read loop with a clean stop
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use gnhast_client::alarm::Alarm;
use gnhast_client::client::{EventLoop, HubClient, TcpConnector};
use gnhast_client::clock::ManualClock;
use gnhast_client::config::ReconnectPolicy;
use gnhast_client::device::Device;
use gnhast_client::hooks::CollectorHooks;
use gnhast_client::{CancellationToken, Session};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::hub_stub::MockHub;

/// Default wait for anything crossing the socket
pub const WAIT: Duration = Duration::from_secs(2);

/// Installs a test-friendly subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// One hook invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    Register(Device),
    Update(Device),
    Change(Device),
    Alarm(Alarm),
}

impl HookCall {
    pub fn uid(&self) -> &str {
        match self {
            HookCall::Register(d) | HookCall::Update(d) | HookCall::Change(d) => &d.uid,
            HookCall::Alarm(a) => &a.uid,
        }
    }
}

/// Hooks that only record what they were called with
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }

    pub fn updates_for(&self, uid: &str) -> Vec<Device> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HookCall::Update(d) if d.uid == uid => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> Result<Vec<HookCall>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let calls = self.calls();
            if calls.len() >= count {
                return Ok(calls);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {count} hook calls, got {calls:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl CollectorHooks for RecordingHooks {
    async fn on_register(&self, _session: &Session, device: &Device) {
        self.calls.lock().push(HookCall::Register(device.clone()));
    }

    async fn on_update(&self, _session: &Session, device: &Device) {
        self.calls.lock().push(HookCall::Update(device.clone()));
    }

    async fn on_change(&self, _session: &Session, device: &Device) {
        self.calls.lock().push(HookCall::Change(device.clone()));
    }

    async fn on_alarm(&self, _session: &Session, alarm: &Alarm) {
        self.calls.lock().push(HookCall::Alarm(alarm.clone()));
    }
}

/// A read loop running in the background
pub struct RunningSession {
    shutdown: CancellationToken,
    handle: JoinHandle<gnhast_client::Result<()>>,
}

impl RunningSession {
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels the loop and returns its result.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Waits for the loop to end on its own.
    pub async fn join(self) -> Result<()> {
        tokio::time::timeout(WAIT * 5, self.handle)
            .await
            .context("session did not stop")?
            .context("session task panicked")?
            .context("session ended with an error")
    }
}

pub struct TestHarness {
    pub hub: MockHub,
    pub clock: ManualClock,
    pub session: Session,
    eventloop: Option<EventLoop<TcpConnector>>,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_policy(ReconnectPolicy::Never).await
    }

    pub async fn with_policy(policy: ReconnectPolicy) -> Result<Self> {
        init_tracing();
        let hub = MockHub::start().await?;
        let (client, eventloop) = HubClient::connect_with(hub.connector(), policy).await?;
        hub.wait_for_connections(1, WAIT).await?;

        let clock = ManualClock::at_secs(1_000_000);
        let session = Session::new(client).with_clock(Arc::new(clock.clone()));
        Ok(Self {
            hub,
            clock,
            session,
            eventloop: Some(eventloop),
        })
    }

    /// Hands out the event loop for a test that drives it directly.
    pub fn take_eventloop(&mut self) -> Result<EventLoop<TcpConnector>> {
        self.eventloop.take().context("event loop already taken")
    }

    /// Runs the session read loop with `hooks` in a background task.
    pub fn run<H>(&mut self, hooks: Arc<H>) -> Result<RunningSession>
    where
        H: CollectorHooks + 'static,
    {
        let mut eventloop = self.take_eventloop()?;
        let session = self.session.clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { session.run(&mut eventloop, &*hooks, token).await });
        Ok(RunningSession { shutdown, handle })
    }

    /// Runs discovery to completion, then hands the loop to the background.
    pub async fn discover_and_run<H>(&mut self, hooks: Arc<H>) -> Result<RunningSession>
    where
        H: CollectorHooks + 'static,
    {
        let mut eventloop = self.take_eventloop()?;
        let never = CancellationToken::new();
        tokio::time::timeout(WAIT, self.session.discover(&mut eventloop, &*hooks, None, &never))
            .await
            .context("discovery timed out")??;
        self.eventloop = Some(eventloop);
        self.run(hooks)
    }
}

/// Declares a test with a fresh [`TestHarness`] bound to `$harness`. The
/// body evaluates to `anyhow::Result<()>`.
#[macro_export]
macro_rules! hub_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            #[allow(unused_mut)]
            async fn body(mut $harness: $crate::test_utils::TestHarness) -> anyhow::Result<()> $body

            let harness = $crate::test_utils::TestHarness::new()
                .await
                .expect("mock hub should start");
            if let Err(e) = body(harness).await {
                panic!("{} failed: {e:#}", stringify!($name));
            }
        }
    };
}
