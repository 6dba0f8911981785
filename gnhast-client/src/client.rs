//! Hub transport
//!
//! [`HubClient`] is a clonable handle that queues outbound messages and never
//! blocks. [`EventLoop`] owns the connection; polling it writes queued
//! messages and yields decoded inbound ones. Only the event loop reads from
//! the socket.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, trace, warn};

use crate::alarm::{AlarmChannels, Severity};
use crate::codec::{self, Message, Registration, ValueUpdate, Verb, MAX_LINE_LENGTH};
use crate::config::{HubConfig, ReconnectPolicy};
use crate::device::{Device, DeviceData};
use crate::error::{Error, Result};

/// Opens byte streams to the hub
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable address for logs
    fn endpoint(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            addr: format!("{hostname}:{port}"),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// What one turn of the event loop produced
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Incoming(Message),
    /// A queued message was written to the hub
    Outgoing(Verb),
    /// The connection was re-established; the session preamble is queued
    Reconnected { attempt: u32 },
}

/// Handle for queueing messages to the hub
#[derive(Debug, Clone)]
pub struct HubClient {
    tx: mpsc::UnboundedSender<Message>,
}

impl HubClient {
    /// Connects to the hub described by `config`.
    pub async fn connect(config: &HubConfig) -> Result<(HubClient, EventLoop<TcpConnector>)> {
        Self::connect_with(TcpConnector::new(&config.hostname, config.port), config.reconnect).await
    }

    pub async fn connect_with<C: Connector>(
        connector: C,
        policy: ReconnectPolicy,
    ) -> Result<(HubClient, EventLoop<C>)> {
        let stream = connector.connect().await?;
        info!(endpoint = %connector.endpoint(), "connected to hub");

        let (tx, rx) = mpsc::unbounded_channel();
        let eventloop = EventLoop {
            framed: Some(framed(stream)),
            connector,
            outgoing: rx,
            outgoing_closed: false,
            pending: VecDeque::new(),
            preamble: Preamble::default(),
            policy,
        };
        Ok((HubClient { tx }, eventloop))
    }

    /// A handle with no connection behind it; queued messages land on the
    /// returned receiver.
    pub fn detached() -> (HubClient, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HubClient { tx }, rx)
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::SessionClosed)
    }

    pub fn identify(&self, name: &str) -> Result<()> {
        self.send(Message::Client {
            name: name.to_string(),
        })
    }

    pub fn register(&self, device: &Device) -> Result<()> {
        self.send(Message::Register(Registration::from(device)))
    }

    /// Pushes the current value of a device. Devices without data yet are
    /// skipped.
    pub fn update(&self, device: &Device) -> Result<()> {
        let Some(data) = device.data else {
            debug!(uid = %device.uid, "no data yet, update skipped");
            return Ok(());
        };
        self.send(Message::Update(ValueUpdate {
            uid: device.uid.clone(),
            data,
            last_update: device.last_update,
        }))
    }

    pub fn change(&self, uid: &str, data: DeviceData) -> Result<()> {
        self.send(Message::Change(ValueUpdate::new(uid, data)))
    }

    /// Asks the hub to forward updates of `uid` every `rate` seconds.
    pub fn feed(&self, uid: &str, rate: u32) -> Result<()> {
        self.send(Message::Feed {
            uid: uid.to_string(),
            rate,
        })
    }

    /// Asks the hub to forward every change of `uid`.
    pub fn cfeed(&self, uid: &str) -> Result<()> {
        self.send(Message::ContinuousFeed {
            uid: uid.to_string(),
        })
    }

    pub fn list_devices(&self, uid: Option<&str>) -> Result<()> {
        self.send(Message::ListDevices {
            uid: uid.map(str::to_string),
        })
    }

    pub fn ask(&self, uid: &str, full: bool) -> Result<()> {
        self.send(Message::Ask {
            uid: uid.to_string(),
            full,
        })
    }

    pub fn listen_alarms(&self, min_severity: Severity, channels: AlarmChannels) -> Result<()> {
        self.send(Message::ListenAlarms {
            min_severity,
            channels,
        })
    }

    pub fn dump_alarms(&self, min_severity: Severity, channels: AlarmChannels) -> Result<()> {
        self.send(Message::DumpAlarms {
            min_severity,
            channels,
        })
    }

    pub fn imalive(&self, healthy: bool) -> Result<()> {
        self.send(Message::ImAlive { healthy })
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Message::Disconnect)
    }
}

/// Messages replayed after a reconnect, latest per device
#[derive(Default)]
struct Preamble {
    client: Option<Message>,
    registrations: Vec<Message>,
    subscriptions: Vec<Message>,
    alarms: Option<Message>,
}

impl Preamble {
    fn record(&mut self, message: &Message) {
        match message {
            Message::Client { .. } => self.client = Some(message.clone()),
            Message::Register(_) => replace_by_uid(&mut self.registrations, message),
            Message::Feed { .. } | Message::ContinuousFeed { .. } => {
                replace_by_uid(&mut self.subscriptions, message)
            }
            Message::ListenAlarms { .. } => self.alarms = Some(message.clone()),
            _ => {}
        }
    }

    fn replay(&self) -> VecDeque<Message> {
        self.client
            .iter()
            .chain(&self.registrations)
            .chain(&self.subscriptions)
            .chain(&self.alarms)
            .cloned()
            .collect()
    }
}

fn replace_by_uid(list: &mut Vec<Message>, message: &Message) {
    match list.iter_mut().find(|m| m.uid() == message.uid()) {
        Some(slot) => *slot = message.clone(),
        None => list.push(message.clone()),
    }
}

fn framed<S: AsyncRead + AsyncWrite>(stream: S) -> Framed<S, LinesCodec> {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

enum Step {
    Send(Option<Message>),
    Read(Option<std::result::Result<String, LinesCodecError>>),
}

/// Owner of the hub connection
pub struct EventLoop<C: Connector = TcpConnector> {
    connector: C,
    framed: Option<Framed<C::Stream, LinesCodec>>,
    outgoing: mpsc::UnboundedReceiver<Message>,
    outgoing_closed: bool,
    pending: VecDeque<Message>,
    preamble: Preamble,
    policy: ReconnectPolicy,
}

impl<C: Connector> EventLoop<C> {
    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Runs until something happens: a queued message is written, a line is
    /// decoded, or the connection is re-established. Malformed lines are
    /// logged and skipped. Transport failures are returned unless the
    /// reconnect policy recovers them.
    ///
    /// Dropping the returned future mid-write loses nothing: a message leaves
    /// the queue only once the sink has taken it, and bytes the sink holds
    /// are flushed first on the next poll.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            let Some(framed) = self.framed.as_mut() else {
                return self.connection_lost(Error::ConnectionClosed).await;
            };
            if !framed.write_buffer().is_empty() {
                if let Err(e) = SinkExt::<String>::flush(&mut *framed).await {
                    return self.write_failed(e).await;
                }
            }

            if !self.pending.is_empty() {
                if let Err(e) = future::poll_fn(|cx| SinkExt::<String>::poll_ready_unpin(&mut *framed, cx)).await {
                    return self.write_failed(e).await;
                }
                let Some(message) = self.pending.pop_front() else {
                    continue;
                };
                let line = codec::encode(&message);
                trace!(%line, "hub <-");
                if let Err(e) = framed.start_send_unpin(line) {
                    self.pending.push_front(message);
                    return self.write_failed(e).await;
                }
                self.preamble.record(&message);
                if let Err(e) = SinkExt::<String>::flush(&mut *framed).await {
                    self.pending.push_front(message);
                    return self.write_failed(e).await;
                }
                return Ok(Event::Outgoing(message.verb()));
            }

            let step = tokio::select! {
                biased;
                message = self.outgoing.recv(), if !self.outgoing_closed => Step::Send(message),
                line = framed.next() => Step::Read(line),
            };

            match step {
                Step::Send(Some(message)) => self.pending.push_back(message),
                Step::Send(None) => {
                    debug!("all client handles dropped, outbound queue closed");
                    self.outgoing_closed = true;
                }
                Step::Read(Some(Ok(line))) => match codec::decode(&line) {
                    Ok(message) => {
                        trace!(%line, "hub ->");
                        return Ok(Event::Incoming(message));
                    }
                    Err(e) => warn!(error = %e, %line, "dropping malformed line from hub"),
                },
                Step::Read(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!(max = MAX_LINE_LENGTH, "dropping over-long line from hub");
                }
                Step::Read(Some(Err(LinesCodecError::Io(e)))) => {
                    return self.connection_lost(Error::Connection(e)).await;
                }
                Step::Read(None) => return self.connection_lost(Error::ConnectionClosed).await,
            }
        }
    }

    async fn write_failed(&mut self, e: LinesCodecError) -> Result<Event> {
        let cause = match e {
            LinesCodecError::Io(e) => Error::Connection(e),
            LinesCodecError::MaxLineLengthExceeded => Error::ConnectionClosed,
        };
        self.connection_lost(cause).await
    }

    async fn connection_lost(&mut self, cause: Error) -> Result<Event> {
        self.framed = None;
        let ReconnectPolicy::Retry {
            delay_secs,
            max_attempts,
        } = self.policy
        else {
            return Err(cause);
        };

        warn!(error = %cause, endpoint = %self.connector.endpoint(), "lost hub connection, reconnecting");
        for attempt in 1..=max_attempts {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            match self.connector.connect().await {
                Ok(stream) => {
                    self.framed = Some(framed(stream));
                    let mut queue = self.preamble.replay();
                    queue.append(&mut self.pending);
                    self.pending = queue;
                    info!(attempt, "reconnected to hub");
                    return Ok(Event::Reconnected { attempt });
                }
                Err(e) => warn!(attempt, max_attempts, error = %e, "reconnect attempt failed"),
            }
        }
        Err(cause)
    }
}
