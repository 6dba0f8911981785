//! gnhast pressure differential collector
//!
//! Watches two pressure feeds announced by the hub and publishes their
//! difference as a device of its own:
//! - subscribes to the reference and comparison feeds at the update rate
//! - recomputes the differential whenever both feeds are fresh
//! - reports itself unhealthy while either feed is missing or stale

mod config;
mod hooks;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::PresdiffConfig;
use gnhast_client::client::{EventLoop, HubClient, TcpConnector};
use gnhast_client::config::{self as client_config, CollectorConfig, ConfigLoad};
use gnhast_client::device::{Device, DeviceType, Proto, SubType};
use gnhast_client::logging::init_logging;
use gnhast_client::monitor::CorrelationMonitor;
use gnhast_client::signals::spawn_signal_handler;
use gnhast_client::{CancellationToken, Discovery, Error, Session};
use hooks::PresdiffHooks;
use tracing::{error, info, warn};

struct Collector {
    config: PresdiffConfig,
    session: Session,
    eventloop: EventLoop<TcpConnector>,
    hooks: Arc<PresdiffHooks>,
}

impl Collector {
    async fn connect(config: PresdiffConfig) -> Result<Self> {
        let section = &config.presdiff;
        let monitor = CorrelationMonitor::new(section.correlation()).context("invalid correlation settings")?;

        let (client, eventloop) = HubClient::connect(&config.hub)
            .await
            .with_context(|| format!("cannot connect to gnhastd at {}:{}", config.hub.hostname, config.hub.port))?;

        let session = Session::new(client);
        session.declare(
            Device::new(&section.diffuid, &section.diff_name, DeviceType::Sensor, SubType::Pressure)
                .with_proto(Proto(section.proto)),
        );
        let hooks = Arc::new(PresdiffHooks::new(monitor, section.update));

        Ok(Self {
            config,
            session,
            eventloop,
            hooks,
        })
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Arc<dyn gnhast_client::clock::Clock>) -> Self {
        self.session = self.session.with_clock(clock);
        self
    }

    /// Announces the derived device, finds both feeds, then serves until
    /// shutdown. The hub is always told we are leaving.
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!("Pressure Differential collector starting up");
        self.session.start(&self.config.client_name())?;

        match self.discover_feeds(&shutdown).await {
            Ok(Discovery::Complete) => {}
            Ok(Discovery::Cancelled) => {
                self.session
                    .close(&mut self.eventloop)
                    .await
                    .context("disconnect during discovery did not complete")?;
                return Ok(());
            }
            Err(e) => {
                if let Err(close) = self.session.close(&mut self.eventloop).await {
                    warn!(error = %close, "disconnect after failed discovery did not complete");
                }
                return Err(e);
            }
        }

        self.session
            .run(&mut self.eventloop, self.hooks.as_ref(), shutdown)
            .await
            .context("hub session failed")
    }

    async fn discover_feeds(&mut self, shutdown: &CancellationToken) -> Result<Discovery> {
        let section = &self.config.presdiff;
        info!("asking gnhast for data on sensors");
        for uid in [&section.refuid, &section.compuid] {
            let outcome = self
                .session
                .discover(&mut self.eventloop, self.hooks.as_ref(), Some(uid.as_str()), shutdown)
                .await
                .with_context(|| format!("discovery of {uid} failed"))?;
            if outcome == Discovery::Cancelled {
                return Ok(Discovery::Cancelled);
            }
            if !self.session.registry().contains(uid) {
                return Err(Error::Configuration(format!("feed {uid} is not known to gnhastd")).into());
            }
        }
        Ok(Discovery::Complete)
    }
}

async fn run() -> Result<()> {
    let config = match client_config::load_or_init::<PresdiffConfig>()
        .await
        .context("cannot load configuration")?
    {
        ConfigLoad::Loaded(config) => config,
        ConfigLoad::FirstRun(path) => {
            println!("This is your first run of the collector, wrote {}", path.display());
            println!("Edit it to fill in refuid and compuid, then restart collector");
            return Ok(());
        }
    };

    let log = init_logging(config.log()).context("cannot set up logging")?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone(), &log).context("cannot install signal handlers")?;

    let result = async move { Collector::connect(config).await?.run(shutdown).await }.await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("gnhast-presdiff: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnhast_client::clock::ManualClock;
    use gnhast_client::codec::{Message, Verb};
    use gnhast_client::device::DeviceData;
    use gnhast_devkit::fixtures::remote_device;
    use gnhast_devkit::test_utils::{init_tracing, WAIT};
    use gnhast_devkit::MockHub;

    fn config_for(hub: &MockHub) -> PresdiffConfig {
        let mut config = PresdiffConfig {
            hub: hub.hub_config(),
            ..Default::default()
        };
        config.presdiff.refuid = "outside".into();
        config.presdiff.compuid = "inside".into();
        config
    }

    #[tokio::test]
    async fn test_subscribes_and_publishes_differential() {
        init_tracing();
        let hub = MockHub::start().await.unwrap();
        hub.add_device(&remote_device("outside", "Outside", DeviceType::Sensor, SubType::Pressure));
        hub.add_device(&remote_device("inside", "Inside", DeviceType::Sensor, SubType::Pressure));

        let clock = ManualClock::at_secs(1_000);
        let collector = Collector::connect(config_for(&hub))
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(collector.run(shutdown.clone()));

        hub.wait_for(|l| l == "feed uid:outside rate:5", WAIT).await.unwrap();
        hub.wait_for(|l| l == "ask uid:inside", WAIT).await.unwrap();
        hub.push_update("outside", DeviceData::Pressure(1012.0)).unwrap();
        hub.push_update("inside", DeviceData::Pressure(1009.5)).unwrap();

        let Message::Update(upd) = hub.wait_for_verb(Verb::Update, 1, WAIT).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(upd.uid, "presdiff");
        assert_eq!(upd.data, DeviceData::Pressure(2.5));

        shutdown.cancel();
        task.await.unwrap().unwrap();
        hub.wait_for(|l| l == "disconnect", WAIT).await.unwrap();

        let received = hub.received();
        assert_eq!(received[0], "client client:presdiff");
        assert!(received[1].starts_with("reg uid:presdiff name:\"Pressure Differential\""));
    }

    #[tokio::test]
    async fn test_unknown_feed_is_fatal_after_disconnect() {
        init_tracing();
        let hub = MockHub::start().await.unwrap();
        hub.add_device(&remote_device("outside", "Outside", DeviceType::Sensor, SubType::Pressure));

        let collector = Collector::connect(config_for(&hub)).await.unwrap();
        let err = collector.run(CancellationToken::new()).await.unwrap_err();
        let cause = err.downcast_ref::<Error>().expect("client error");
        assert!(matches!(cause, Error::Configuration(msg) if msg.contains("inside")));
        hub.wait_for(|l| l == "disconnect", WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_hub_withholds_device_list() {
        init_tracing();
        let hub = MockHub::start().await.unwrap();
        hub.ignore_device_list();

        let collector = Collector::connect(config_for(&hub)).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(collector.run(shutdown.clone()));
        hub.wait_for(|l| l == "ldevs uid:outside", WAIT).await.unwrap();

        shutdown.cancel();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        hub.wait_for(|l| l == "disconnect", WAIT).await.unwrap();
        assert!(hub.find_messages(Verb::Feed).is_empty());
    }
}
