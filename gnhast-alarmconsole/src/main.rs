//! gnhast alarm console
//!
//! Listens for alarms on the configured channels and prints one line per
//! alarm, starting with a dump of the alarms already raised.

mod config;
mod console;

use std::io::Write;

use anyhow::{Context, Result};
use config::AlarmConsoleConfig;
use console::ConsoleHooks;
use gnhast_client::client::{Connector, EventLoop, HubClient};
use gnhast_client::config::{self as client_config, CollectorConfig, ConfigLoad};
use gnhast_client::logging::init_logging;
use gnhast_client::signals::spawn_signal_handler;
use gnhast_client::{CancellationToken, Session};
use tracing::{error, info};

/// Subscribes to alarms, asks for the current ones, then serves until
/// shutdown.
async fn watch<C, W>(
    config: &AlarmConsoleConfig,
    session: &Session,
    eventloop: &mut EventLoop<C>,
    hooks: &ConsoleHooks<W>,
    shutdown: CancellationToken,
) -> Result<()>
where
    C: Connector,
    W: Write + Send,
{
    let section = &config.alarmconsole;
    let min_severity = section.min_severity()?;
    let channels = section.channel_mask()?;

    session.start(&config.client_name())?;
    info!(minsev = min_severity.level(), channels = ?channels.names(), "alarmconsole collector starting up");
    session.client().listen_alarms(min_severity, channels)?;
    session.client().dump_alarms(min_severity, channels)?;

    session.run(eventloop, hooks, shutdown).await?;
    info!(active = hooks.active().len(), "alarmconsole stopped");
    Ok(())
}

async fn run() -> Result<()> {
    let config = match client_config::load_or_init::<AlarmConsoleConfig>()
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

    let result = serve(config, shutdown).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

async fn serve(config: AlarmConsoleConfig, shutdown: CancellationToken) -> Result<()> {
    let (client, mut eventloop) = HubClient::connect(&config.hub)
        .await
        .with_context(|| format!("cannot connect to gnhastd at {}:{}", config.hub.hostname, config.hub.port))?;
    let session = Session::new(client);
    let hooks = ConsoleHooks::new(std::io::stdout());

    watch(&config, &session, &mut eventloop, &hooks, shutdown)
        .await
        .context("hub session failed")
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("gnhast-alarmconsole: {e:#}");
        std::process::exit(1);
    }
}
