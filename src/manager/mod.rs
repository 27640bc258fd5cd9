//! The connection manager handle and its background task.

mod command;
mod heartbeat;
mod task;

use std::{fmt::Display, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};

use crate::{
    endpoint::Endpoint,
    listener::{ListenerId, MessageListener, StatusListener},
    message::Message,
};
use command::Command;
use task::ConnectionTask;

/// Default interval between heartbeat probes.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default wait for the reply to a heartbeat probe.
pub const DEFAULT_PONG_DEADLINE: Duration = Duration::from_secs(10);

/// Default number of unanswered probes tolerated before the connection is
/// declared dead.
pub const DEFAULT_MAX_MISSED_PONGS: u32 = 3;

/// Default delay between losing a connection and redialing.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default cap on how long a websocket handshake may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state as observed by status listeners and [`ConnectionManager::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// no transport, and no attempt pending
    Disconnected,
    /// transport open and heartbeat running
    Connected,
    /// transport lost or released, next attempt scheduled
    Reconnecting,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// What this client answers when the server asks it to identify itself.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// application name
    pub name: String,
    /// application version
    pub version: String,
}

impl Default for Manifest {
    /// Falls back to this library's own name and version; embedding
    /// applications should report their own.
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Tunables for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// initial server address, may be set later through
    /// [`ConnectionManager::connect_to`]
    pub endpoint: Option<Endpoint>,

    /// initial client identifier stamped on outbound frames
    pub client_id: Option<String>,

    /// identity reported on manifest requests
    pub manifest: Manifest,

    /// interval between heartbeat probes
    pub ping_interval: Duration,

    /// wait for the reply to a probe before counting it missed
    pub pong_deadline: Duration,

    /// unanswered probes tolerated before teardown and reconnect
    pub max_missed_pongs: u32,

    /// delay between losing a connection and the next attempt
    pub reconnect_delay: Duration,

    /// cap on websocket handshake duration
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            client_id: None,
            manifest: Manifest::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_deadline: DEFAULT_PONG_DEADLINE,
            max_missed_pongs: DEFAULT_MAX_MISSED_PONGS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Handle to one managed websocket connection.
///
/// Cloning is cheap and every clone talks to the same background task, which
/// exclusively owns the transport, the timers and the listener registries.
/// All methods are non-blocking; they enqueue work for the task. The task
/// stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<Status>,
    offset_rx: watch::Receiver<Option<i64>>,
}

impl ConnectionManager {
    /// Create a manager and spawn its connection task.
    ///
    /// Must be called from within a tokio runtime. No connection is attempted
    /// until [`connect`](Self::connect) is called.
    pub fn new(config: ManagerConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Disconnected);
        let (offset_tx, offset_rx) = watch::channel(None);

        tokio::spawn(ConnectionTask::new(config, cmd_rx, status_tx, offset_tx).run());

        Self {
            cmd_tx,
            status_rx,
            offset_rx,
        }
    }

    /// Connect to the last known endpoint.
    ///
    /// Logs an error and does nothing when no endpoint was ever supplied.
    pub fn connect(&self) {
        self.command(Command::Connect { endpoint: None });
    }

    /// Connect to `endpoint`, which becomes the last known endpoint.
    ///
    /// An existing connection to a different address is torn down first, with
    /// exactly one `Disconnected` status event before the new `Connected`.
    pub fn connect_to(&self, endpoint: Endpoint) {
        self.command(Command::Connect {
            endpoint: Some(endpoint),
        });
    }

    /// Tear the connection down and stay down.
    ///
    /// Cancels the heartbeat and any pending reconnect attempt. Idempotent;
    /// emits `Disconnected` only if there was something to release.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drop the current connection and redial after the configured delay.
    ///
    /// A no-op while a reconnect is already pending. Retries forever until a
    /// connection is established or [`disconnect`](Self::disconnect) is called.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Send a message, best effort.
    ///
    /// When the transport is open the frame is stamped with the client id
    /// (unless it already carries one) and transmitted at most once. When it
    /// is not open the message is logged and dropped; nothing is queued.
    pub fn send(&self, message: Message) {
        self.command(Command::Send { message });
    }

    /// Update the client identifier stamped on outbound frames.
    ///
    /// Takes effect from the next outbound frame; the open connection itself
    /// is unaffected.
    pub fn set_id<S: Into<String>>(&self, id: S) {
        self.command(Command::SetId { id: id.into() });
    }

    /// Register a listener for every inbound non-control message.
    pub fn add_listener<L: MessageListener + 'static>(&self, listener: L) -> ListenerId {
        let id = ListenerId::next();
        self.command(Command::AddListener {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a previously registered message listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.command(Command::RemoveListener { id });
    }

    /// Register a listener for status transitions.
    pub fn add_status_listener<L: StatusListener + 'static>(&self, listener: L) -> ListenerId {
        let id = ListenerId::next();
        self.command(Command::AddStatusListener {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a previously registered status listener.
    pub fn remove_status_listener(&self, id: ListenerId) {
        self.command(Command::RemoveStatusListener { id });
    }

    /// Current connection status.
    pub fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    /// Watch channel carrying every status change, for async consumers.
    pub fn status_watcher(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }

    /// Last recorded server-minus-local clock offset in milliseconds, if the
    /// server has published its time on this or an earlier connection.
    pub fn server_time_offset(&self) -> Option<i64> {
        *self.offset_rx.borrow()
    }

    fn command(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            log::error!("connection task is gone, command dropped");
        }
    }
}
