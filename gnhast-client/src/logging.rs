//! tracing setup shared by the collectors
//!
//! `RUST_LOG` wins over the configured level. With a log file configured,
//! events go through a `tracing_appender` worker thread and are appended to
//! the file, which can be reopened after rotation.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Append-only log file that survives rotation
#[derive(Clone)]
pub struct LogFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(open_append(path)?)),
        })
    }

    /// Reopens the path, picking up a fresh file after rotation.
    pub fn reopen(&self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        *self.file.lock() = fresh;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

// Only the appender's worker thread writes here.
impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

/// Kept by the process for as long as it logs. Dropping it flushes the
/// lines still buffered for the log file.
#[derive(Default)]
pub struct LogHandle {
    file: Option<LogFile>,
    _guard: Option<WorkerGuard>,
}

impl LogHandle {
    /// The reopenable file, when logging to one.
    pub fn file(&self) -> Option<LogFile> {
        self.file.clone()
    }
}

/// Filter used when `RUST_LOG` is not set.
pub fn filter_directive(config: &LogConfig) -> String {
    match &config.level {
        Some(level) => level.clone(),
        None if config.debug => "debug".to_string(),
        None => "info".to_string(),
    }
}

pub fn init_logging(config: &LogConfig) -> Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let Some(path) = &config.logfile else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| Error::Configuration(format!("cannot install logger: {e}")))?;
        return Ok(LogHandle::default());
    };

    let file = LogFile::open(path)
        .map_err(|e| Error::Configuration(format!("cannot open log file {}: {e}", path.display())))?;
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file.clone());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .try_init()
        .map_err(|e| Error::Configuration(format!("cannot install logger: {e}")))?;
    Ok(LogHandle {
        file: Some(file),
        _guard: Some(guard),
    })
}
