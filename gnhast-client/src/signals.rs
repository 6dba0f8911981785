use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::logging::LogHandle;

/// SIGTERM and SIGINT cancel `shutdown`; SIGHUP reopens the log file.
/// The handler stops once `shutdown` is cancelled from anywhere.
pub fn spawn_signal_handler(shutdown: CancellationToken, log: &LogHandle) -> io::Result<JoinHandle<()>> {
    let logfile = log.file();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = terminate.recv() => {
                    info!("SIGTERM received, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = interrupt.recv() => {
                    info!("SIGINT received, shutting down");
                    shutdown.cancel();
                    break;
                }
                _ = hangup.recv() => match &logfile {
                    Some(file) => match file.reopen() {
                        Ok(()) => info!(logfile = %file.path().display(), "log output reopened"),
                        Err(e) => warn!(error = %e, "failed to reopen log file"),
                    },
                    None => info!("SIGHUP received, logging to stdout"),
                },
            }
        }
    }))
}
