/*!
Mock hub

Listens on an ephemeral local port and speaks the hub line protocol:
- records every line a collector sends
- answers `ldevs` from a scripted device list, then `endldevs`
- answers `ask`/`askf` with the scripted value, if any
- pushes arbitrary lines to the connected collector
- can drop the connection to exercise reconnects
*/

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gnhast_client::codec::{self, Message, Registration, ValueUpdate, Verb};
use gnhast_client::config::HubConfig;
use gnhast_client::device::{Device, DeviceData};
use gnhast_client::TcpConnector;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Sentinel a real hub closes an `ldevs` dump with
const ENDLDEVS: &str = "endldevs";

enum HubCommand {
    Line(String),
    Drop,
}

#[derive(Default)]
struct HubState {
    received: Mutex<Vec<String>>,
    devices: Mutex<Vec<Registration>>,
    values: Mutex<HashMap<String, DeviceData>>,
    current: Mutex<Option<mpsc::UnboundedSender<HubCommand>>>,
    connections: AtomicU32,
    ldevs_unanswered: AtomicBool,
}

/// In-process hub for collector tests
pub struct MockHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    acceptor: JoinHandle<()>,
}

impl MockHub {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("mock hub cannot bind")?;
        let addr = listener.local_addr()?;
        let state = Arc::new(HubState::default());

        let accept_state = state.clone();
        let acceptor = tokio::spawn(async move {
            while let Ok((socket, peer)) = listener.accept().await {
                let n = accept_state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(%peer, connection = n, "mock hub accepted collector");
                let (tx, rx) = mpsc::unbounded_channel();
                *accept_state.current.lock() = Some(tx);
                tokio::spawn(serve(socket, rx, accept_state.clone()));
            }
        });

        Ok(Self { addr, state, acceptor })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new("127.0.0.1", self.port())
    }

    /// Hub section pointing at this mock
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            hostname: "127.0.0.1".to_string(),
            port: self.port(),
            ..HubConfig::default()
        }
    }

    /// Adds a device to the `ldevs` answer. A device with data also
    /// answers `ask`.
    pub fn add_device(&self, device: &Device) {
        self.state.devices.lock().push(Registration::from(device));
        if let Some(data) = device.data {
            self.set_value(&device.uid, data);
        }
    }

    /// Leaves `ldevs` requests unanswered from now on.
    pub fn ignore_device_list(&self) {
        self.state.ldevs_unanswered.store(true, Ordering::SeqCst);
    }

    pub fn set_value(&self, uid: &str, data: DeviceData) {
        self.state.values.lock().insert(uid.to_string(), data);
    }

    /// Writes a raw line to the most recent connection.
    pub fn send_line(&self, line: &str) -> Result<()> {
        self.command(HubCommand::Line(line.to_string()))
    }

    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_line(&codec::encode(message))
    }

    /// Pushes an `upd` for `uid`.
    pub fn push_update(&self, uid: &str, data: DeviceData) -> Result<()> {
        self.send(&Message::Update(ValueUpdate::new(uid, data)))
    }

    /// Closes the current connection from the hub side.
    pub fn drop_client(&self) -> Result<()> {
        self.command(HubCommand::Drop)?;
        *self.state.current.lock() = None;
        Ok(())
    }

    fn command(&self, command: HubCommand) -> Result<()> {
        match self.state.current.lock().as_ref() {
            Some(tx) => tx
                .send(command)
                .map_err(|_| anyhow::anyhow!("collector connection is gone")),
            None => bail!("no collector connected"),
        }
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    /// Received lines that decode, in arrival order.
    pub fn received_messages(&self) -> Vec<Message> {
        self.state
            .received
            .lock()
            .iter()
            .filter_map(|line| codec::decode(line).ok())
            .collect()
    }

    pub fn find_messages(&self, verb: Verb) -> Vec<Message> {
        self.received_messages()
            .into_iter()
            .filter(|m| m.verb() == verb)
            .collect()
    }

    pub fn clear(&self) {
        self.state.received.lock().clear();
    }

    /// Waits until a received line satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(line) = self.state.received.lock().iter().find(|l| predicate(l)) {
                return Ok(line.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("timed out after {timeout:?}; received {:?}", self.received());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for the `count`-th message with `verb` and returns it.
    pub async fn wait_for_verb(&self, verb: Verb, count: usize, timeout: Duration) -> Result<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.find_messages(verb).into_iter().nth(count.saturating_sub(1)) {
                return Ok(message);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "no {} #{count} after {timeout:?}; received {:?}",
                    verb.keyword(),
                    self.received()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for_connections(&self, count: u32, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.connections() < count || self.state.current.lock().is_none() {
            if tokio::time::Instant::now() >= deadline {
                bail!("only {} connections after {timeout:?}", self.connections());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve(socket: TcpStream, mut commands: mpsc::UnboundedReceiver<HubCommand>, state: Arc<HubState>) {
    let (read_half, mut writer) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                trace!(%line, "mock hub received");
                let replies = answer(&line, &state);
                state.received.lock().push(line);
                for reply in replies {
                    if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            command = commands.recv() => match command {
                Some(HubCommand::Line(line)) => {
                    if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(HubCommand::Drop) | None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
}

/// Scripted replies for requests a real hub answers on its own.
fn answer(line: &str, state: &HubState) -> Vec<String> {
    match codec::decode(line) {
        Ok(Message::ListDevices { .. }) if state.ldevs_unanswered.load(Ordering::SeqCst) => Vec::new(),
        Ok(Message::ListDevices { uid }) => {
            let mut replies: Vec<String> = state
                .devices
                .lock()
                .iter()
                .filter(|reg| uid.as_deref().is_none_or(|u| u == reg.uid))
                .map(|reg| codec::encode(&Message::Register(reg.clone())))
                .collect();
            replies.push(ENDLDEVS.to_string());
            replies
        }
        Ok(Message::Ask { uid, .. }) => state
            .values
            .lock()
            .get(&uid)
            .map(|data| codec::encode(&Message::Update(ValueUpdate::new(uid.clone(), *data))))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}
