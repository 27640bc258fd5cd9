use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{
    future::{self, BoxFuture},
    FutureExt, SinkExt, StreamExt,
};
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_tungstenite::tungstenite as websocket;

use super::{command::Command, heartbeat::Heartbeat, ManagerConfig, Status};
use crate::{
    dispatch::ServerFrame,
    endpoint::Endpoint,
    listener::{MessageListener, Registry, StatusListener},
    message::{
        stream::{MessageStreamSink, MessageStreamSinkError},
        Message, KIND_PING, KIND_PONG,
    },
};

/// Error when establishing a websocket connection
#[derive(Debug, Snafu)]
#[snafu(module(error), context(suffix(false)))]
enum ConnectError {
    /// websocket handshake failed
    #[snafu(display("connect to {endpoint} failed: {source}"))]
    Handshake {
        endpoint: Endpoint,
        source: websocket::Error,
    },

    /// handshake did not finish in time
    #[snafu(display("connect to {endpoint} timed out"))]
    Timeout { endpoint: Endpoint },
}

/// The background task behind a [`ConnectionManager`](super::ConnectionManager).
///
/// Exclusively owns the transport, the heartbeat clocks, the reconnect clock
/// and both listener registries. Commands, inbound frames and timer
/// expirations are processed as discrete turns of one `select!` loop, so no
/// locking is needed anywhere.
#[derive(Debug)]
pub(crate) struct ConnectionTask {
    config: ManagerConfig,
    endpoint: Option<Endpoint>,
    client_id: Option<String>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<Status>,
    offset_tx: watch::Sender<Option<i64>>,
    transport: Option<MessageStreamSink>,
    heartbeat: Heartbeat,
    reconnect_at: Option<Instant>,
    listeners: Registry<dyn MessageListener>,
    status_listeners: Registry<dyn StatusListener>,
}

impl ConnectionTask {
    pub fn new(
        config: ManagerConfig,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<Status>,
        offset_tx: watch::Sender<Option<i64>>,
    ) -> Self {
        let endpoint = config.endpoint.clone();
        let client_id = config.client_id.clone();
        let heartbeat = Heartbeat::new(
            config.ping_interval,
            config.pong_deadline,
            config.max_missed_pongs,
        );

        Self {
            config,
            endpoint,
            client_id,
            cmd_rx,
            status_tx,
            offset_tx,
            transport: None,
            heartbeat,
            reconnect_at: None,
            listeners: Registry::new(),
            status_listeners: Registry::new(),
        }
    }

    pub async fn run(mut self) {
        log::debug!("connection task start");

        loop {
            let pong_due = self.heartbeat.pong_tick();
            let ping_at = self.heartbeat.ping_tick();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    // every handle dropped
                    None => break,
                },

                _ = sleep_until_or_never(pong_due) => self.on_pong_deadline().await,

                _ = sleep_until_or_never(ping_at) => self.send_ping().await,

                _ = sleep_until_or_never(reconnect_at) => self.on_reconnect_elapsed().await,

                frame = next_frame(&mut self.transport) => self.on_frame(frame).await,
            }
        }

        log::debug!("all manager handles dropped, connection task stop");
        self.teardown().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint } => self.connect(endpoint).await,
            Command::Disconnect => self.disconnect().await,
            Command::Reconnect => self.reconnect().await,
            Command::Send { message } => self.send(message).await,
            Command::SetId { id } => {
                log::debug!("client id set to {id}");
                self.client_id = Some(id);
            }
            Command::AddListener { id, listener } => self.listeners.insert(id, listener),
            Command::RemoveListener { id } => self.listeners.remove(id),
            Command::AddStatusListener { id, listener } => {
                self.status_listeners.insert(id, listener)
            }
            Command::RemoveStatusListener { id } => self.status_listeners.remove(id),
        }
    }

    async fn connect(&mut self, endpoint: Option<Endpoint>) {
        let Some(endpoint) = endpoint.or_else(|| self.endpoint.clone()) else {
            log::error!("connect requested but no endpoint is known");
            return;
        };
        self.endpoint = Some(endpoint.clone());

        // an explicit connect supersedes a pending retry
        self.reconnect_at = None;

        if self.transport.is_some() {
            self.teardown().await;
            self.emit_status(Status::Disconnected);
        }

        match self.open(&endpoint).await {
            Ok(stream) => {
                log::info!("connected to {endpoint}");
                self.transport = Some(stream);
                self.heartbeat.start();
                self.emit_status(Status::Connected);
            }
            Err(err) => {
                log::warn!("{err}");
                self.enter_reconnect();
            }
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<MessageStreamSink, ConnectError> {
        let url = endpoint.url();
        log::debug!("dialing {url}");

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(result) => {
                let (ws, _response) = result.with_context(|_| error::Handshake {
                    endpoint: endpoint.clone(),
                })?;
                Ok(MessageStreamSink::new(ws))
            }
            Err(_) => error::Timeout {
                endpoint: endpoint.clone(),
            }
            .fail(),
        }
    }

    async fn disconnect(&mut self) {
        let was_active = self.transport.is_some() || self.reconnect_at.is_some();
        self.reconnect_at = None;
        self.teardown().await;

        if was_active {
            log::info!("disconnected on request");
            self.emit_status(Status::Disconnected);
        }
    }

    async fn reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            log::debug!("reconnect already pending, ignored");
            return;
        }

        self.emit_status(Status::Reconnecting);
        self.teardown().await;
        self.schedule_retry();
    }

    /// The connection ended without a local `disconnect`: release it, tell
    /// listeners, and start the retry clock.
    async fn on_connection_lost(&mut self) {
        self.teardown().await;
        self.emit_status(Status::Disconnected);
        self.enter_reconnect();
    }

    fn enter_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        self.emit_status(Status::Reconnecting);
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        log::debug!(
            "next connection attempt in {:?}",
            self.config.reconnect_delay
        );
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay);
    }

    async fn on_reconnect_elapsed(&mut self) {
        self.reconnect_at = None;
        log::debug!("reconnect delay elapsed");
        self.connect(None).await;
    }

    /// Close the transport if any and disarm the heartbeat. Emits nothing;
    /// callers decide which status events surround the teardown.
    async fn teardown(&mut self) {
        if let Some(mut stream) = self.transport.take() {
            if let Err(err) = stream.close().await {
                log::debug!("closing websocket failed: {err}");
            }
        }
        self.heartbeat.stop();
    }

    async fn send(&mut self, message: Message) {
        if self.transport.is_none() {
            log::error!(
                "send while disconnected, {}/{} message dropped",
                message.app,
                message.kind
            );
            return;
        }

        let message = self.stamped(message);
        self.transmit(message).await;
    }

    async fn send_ping(&mut self) {
        log::trace!("heartbeat ping");
        // advance the clocks first so a failed send cannot refire the tick
        self.heartbeat.on_ping_sent();

        let probe = self.stamped(Message::ping_probe());
        self.transmit(probe).await;
    }

    async fn on_pong_deadline(&mut self) {
        if self.heartbeat.on_deadline_elapsed() {
            log::warn!("pong limit reached, connection considered dead");
            self.on_connection_lost().await;
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, MessageStreamSinkError>>) {
        match frame {
            None => {
                log::warn!("server closed the connection");
                self.on_connection_lost().await;
            }
            Some(Err(err)) if err.is_fatal() => {
                log::warn!("websocket stream broken: {err}");
                self.on_connection_lost().await;
            }
            Some(Err(err)) => {
                log::warn!("skip one frame: {err}");
            }
            Some(Ok(message)) => self.route(message).await,
        }
    }

    /// Heartbeat frames stay internal; other reserved-channel frames are
    /// dispatched internally and also forwarded, everything else only
    /// forwarded.
    async fn route(&mut self, message: Message) {
        if message.is_client_channel() {
            match message.kind.as_str() {
                KIND_PONG => {
                    log::trace!("heartbeat pong");
                    self.heartbeat.on_pong();
                    return;
                }
                KIND_PING => {
                    log::trace!("server ping, replying");
                    let reply = self.stamped(Message::pong_reply());
                    self.transmit(reply).await;
                    return;
                }
                _ => self.dispatch(&message).await,
            }
        }

        self.fan_out(&message);
    }

    async fn dispatch(&mut self, message: &Message) {
        match ServerFrame::classify(message) {
            ServerFrame::ManifestRequest => {
                log::debug!("manifest requested");
                let reply = self.stamped(Message::manifest_reply(&self.config.manifest));
                self.transmit(reply).await;
            }
            ServerFrame::TimeSync { server_time_ms } => {
                let offset = server_time_ms - local_epoch_ms();
                log::debug!("server time offset recorded, {offset} ms");
                self.offset_tx.send_replace(Some(offset));
            }
            ServerFrame::Unrecognized => {
                log::debug!(
                    "unrecognized frame on the client channel, type {}",
                    message.kind
                );
            }
        }
    }

    async fn transmit(&mut self, message: Message) {
        let Some(stream) = self.transport.as_mut() else {
            return;
        };

        if let Err(err) = stream.send(message).await {
            log::warn!("send failed: {err}");
            if err.is_fatal() {
                self.on_connection_lost().await;
            }
        }
    }

    fn stamped(&self, mut message: Message) -> Message {
        if message.client.is_none() {
            message.client = self.client_id.clone();
        }
        message
    }

    fn fan_out(&self, message: &Message) {
        for listener in self.listeners.snapshot() {
            listener.on_message(message);
        }
    }

    fn emit_status(&self, status: Status) {
        log::debug!("status change to {status}");
        self.status_tx.send_replace(status);
        for listener in self.status_listeners.snapshot() {
            listener.on_status(status);
        }
    }
}

fn sleep_until_or_never(tick: Option<Instant>) -> BoxFuture<'static, ()> {
    match tick {
        Some(tick) => tokio::time::sleep_until(tick).boxed(),
        None => future::pending().boxed(),
    }
}

async fn next_frame(
    transport: &mut Option<MessageStreamSink>,
) -> Option<Result<Message, MessageStreamSinkError>> {
    match transport {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

fn local_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
