//! gnhast gas sensor collector
//!
//! Reads an environment sensor (gas resistance, humidity, temperature and
//! pressure) and pushes the values to gnhastd. The gas channel is burned in
//! first; its baseline drives the air quality percentage.

mod air_quality;
mod config;
mod sensor;
mod station;

use anyhow::{Context, Result};
use config::GascollConfig;
use gnhast_client::client::HubClient;
use gnhast_client::config::{self as client_config, CollectorConfig, ConfigLoad};
use gnhast_client::hooks::NoHooks;
use gnhast_client::logging::init_logging;
use gnhast_client::signals::spawn_signal_handler;
use gnhast_client::{CancellationToken, Scheduler, Session};
use sensor::IioSensor;
use station::Station;
use tracing::{error, info};

async fn run() -> Result<()> {
    let config = match client_config::load_or_init::<GascollConfig>()
        .await
        .context("cannot load configuration")?
    {
        ConfigLoad::Loaded(config) => config.with_sensor_prefix(),
        ConfigLoad::FirstRun(path) => {
            println!("This is your first run of the collector, wrote {}", path.display());
            println!("Edit it if needed, then restart collector");
            return Ok(());
        }
    };

    let log = init_logging(config.log()).context("cannot set up logging")?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone(), &log).context("cannot install signal handlers")?;

    let result = serve(config, shutdown).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

/// Connects, starts burn-in and polling, and serves the hub until shutdown.
async fn serve(config: GascollConfig, shutdown: CancellationToken) -> Result<()> {
    let (client, mut eventloop) = HubClient::connect(&config.hub)
        .await
        .with_context(|| format!("cannot connect to gnhastd at {}:{}", config.hub.hostname, config.hub.port))?;
    let session = Session::new(client);
    station::declare_devices(&session, &config.gascoll);
    session.start(&config.client_name())?;
    info!(sensor = %config.sensor.device_dir.display(), "gas sensor collector starting up");

    let scheduler = Scheduler::new(&shutdown);
    let read_until = scheduler.drained();
    Station::new(session.clone(), IioSensor::new(&config.sensor), &config.gascoll).spawn(&scheduler);

    let result = session.run(&mut eventloop, &NoHooks, read_until).await;
    shutdown.cancel();
    scheduler.shutdown().await;
    result.context("hub session failed")
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("gnhast-gascoll: {e:#}");
        std::process::exit(1);
    }
}
