//! gnhast feed collector
//!
//! Subscribes to every device the hub knows about and writes each update as
//! a time-series point. The device list is refreshed on a timer so devices
//! added to the hub later are picked up without a restart.

mod config;
mod hooks;
mod sink;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::FeedcollConfig;
use gnhast_client::client::{EventLoop, HubClient, TcpConnector};
use gnhast_client::config::{self as client_config, CollectorConfig, ConfigLoad};
use gnhast_client::logging::init_logging;
use gnhast_client::signals::spawn_signal_handler;
use gnhast_client::{CancellationToken, Scheduler, Session};
use hooks::FeedHooks;
use sink::JsonLinesSink;
use tracing::{debug, error, info, warn};

struct Collector {
    config: FeedcollConfig,
    session: Session,
    eventloop: EventLoop<TcpConnector>,
    hooks: Arc<FeedHooks>,
}

impl Collector {
    async fn connect(config: FeedcollConfig) -> Result<Self> {
        let (client, eventloop) = HubClient::connect(&config.hub)
            .await
            .with_context(|| format!("cannot connect to gnhastd at {}:{}", config.hub.hostname, config.hub.port))?;
        let sink = Arc::new(JsonLinesSink::new(&config.feedcoll.sink_path));
        let hooks = Arc::new(FeedHooks::new(sink, config.feedcoll.feed));

        Ok(Self {
            session: Session::new(client),
            config,
            eventloop,
            hooks,
        })
    }

    /// Serves until shutdown, refreshing the device list every `recheck`
    /// seconds. The refresh stops before the session says goodbye.
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(sink = %self.config.feedcoll.sink_path.display(), "feed collector starting up");
        self.session.start(&self.config.client_name())?;

        let scheduler = Scheduler::new(&shutdown);
        let read_until = scheduler.drained();
        let client = self.session.client().clone();
        scheduler.spawn_periodic("recheck", self.config.feedcoll.recheck_interval(), move || {
            let client = client.clone();
            async move {
                debug!("executing ldevs");
                if let Err(e) = client.list_devices(None) {
                    warn!(error = %e, "cannot ask for the device list");
                }
            }
        });

        let result = self
            .session
            .run(&mut self.eventloop, self.hooks.as_ref(), read_until)
            .await;
        shutdown.cancel();
        scheduler.shutdown().await;
        info!(devices = self.hooks.subscribed(), "feed collector stopped");
        result.context("hub session failed")
    }
}

async fn run() -> Result<()> {
    let config = match client_config::load_or_init::<FeedcollConfig>()
        .await
        .context("cannot load configuration")?
    {
        ConfigLoad::Loaded(config) => config,
        ConfigLoad::FirstRun(path) => {
            println!("This is your first run of the collector, wrote {}", path.display());
            println!("Edit it if needed, then restart collector");
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
        eprintln!("gnhast-feedcoll: {e:#}");
        std::process::exit(1);
    }
}
