//! gnhast relay collector
//!
//! Owns a set of switches and dimmers. When the hub asks for a change, the
//! relay's command is run and the new state is reported back once it
//! succeeded.

mod config;
mod execution;
mod relay;

use anyhow::{Context, Result};
use config::RelaycollConfig;
use gnhast_client::client::{EventLoop, HubClient, TcpConnector};
use gnhast_client::config::{self as client_config, CollectorConfig, ConfigLoad};
use gnhast_client::logging::init_logging;
use gnhast_client::signals::spawn_signal_handler;
use gnhast_client::{CancellationToken, Scheduler, Session};
use relay::RelayHooks;
use tracing::{error, info};

struct Collector {
    config: RelaycollConfig,
    session: Session,
    eventloop: EventLoop<TcpConnector>,
}

impl Collector {
    async fn connect(config: RelaycollConfig) -> Result<Self> {
        let (client, eventloop) = HubClient::connect(&config.hub)
            .await
            .with_context(|| format!("cannot connect to gnhastd at {}:{}", config.hub.hostname, config.hub.port))?;

        let session = Session::new(client);
        for relay in &config.relays {
            session.declare(relay.device(config.relaycoll.proto));
        }
        Ok(Self {
            config,
            session,
            eventloop,
        })
    }

    /// Registers the relays and serves change requests until shutdown.
    /// Commands still running are waited for before disconnecting.
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(relays = self.config.relays.len(), "relay collector starting up");
        self.session.start(&self.config.client_name())?;

        let scheduler = Scheduler::new(&shutdown);
        let read_until = scheduler.drained();
        let hooks = RelayHooks::new(&self.config.relays, scheduler.clone());

        let result = self.session.run(&mut self.eventloop, &hooks, read_until).await;
        shutdown.cancel();
        scheduler.shutdown().await;
        result.context("hub session failed")
    }
}

async fn run() -> Result<()> {
    let config = match client_config::load_or_init::<RelaycollConfig>()
        .await
        .context("cannot load configuration")?
    {
        ConfigLoad::Loaded(config) => config,
        ConfigLoad::FirstRun(path) => {
            println!("This is your first run of the collector, wrote {}", path.display());
            println!("Add a [[relay]] table for each device, then restart collector");
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
        eprintln!("gnhast-relaycoll: {e:#}");
        std::process::exit(1);
    }
}
