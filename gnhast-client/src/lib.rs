//! gnhast collector client
//!
//! Shared runtime for the small collector processes that talk to a gnhast
//! hub:
//! - line codec for the hub protocol
//! - device registry keyed by uid
//! - session client with an owned event loop and named hooks
//! - correlation monitor and stabilization sampler
//! - config, logging, signals and periodic tasks

pub mod alarm;
pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod hooks;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod sampler;
pub mod sensor;
pub mod session;
pub mod signals;
pub mod sink;
pub mod tasks;

pub use alarm::{Alarm, AlarmChannels, Severity};
pub use client::{Connector, Event, EventLoop, HubClient, TcpConnector};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Message, Registration, ValueUpdate, Verb};
pub use config::{CollectorConfig, ConfigLoad, HubConfig, LogConfig, ReconnectPolicy};
pub use device::{Device, DeviceData, DeviceType, Origin, Proto, SubType, TempScale};
pub use error::{Error, ProtocolError, Result};
pub use health::{Health, HealthReport};
pub use hooks::{CollectorHooks, NoHooks};
pub use monitor::{Correlation, CorrelationMonitor};
pub use registry::DeviceRegistry;
pub use sampler::{compute_baseline, Baseline, Stabilization, Stabilizer};
pub use sensor::SensorSource;
pub use session::{Discovery, Session};
pub use sink::{write_best_effort, Point, Sink};
pub use tasks::Scheduler;

// Re-exported so collectors share one cancellation type
pub use tokio_util::sync::CancellationToken;
