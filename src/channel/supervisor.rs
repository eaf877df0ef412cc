//! Event channel supervisor
//!
//! Keeps one duplex connection to `{base}hit/{camera}` alive. A close that
//! wasn't asked for bumps the retry counter and reconnects after
//! `min(initial * 2^min(retry - 1, max_exponent), max)`. Each connection gets
//! a generation number; events from an older generation are dropped, so a
//! superseded connection can never trigger a reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::protocol::{ChannelReadyState, InboundMessage, OutboundMessage};
use super::transport::{ChannelConnection, ChannelConnector, FrameSink, FrameStream};
use crate::error::{AppError, Result};
use crate::utils::{exponential_delay, LogThrottler};
use crate::{debug_throttled, warn_throttled};

/// How long a graceful close may take before the connection is just dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long one outbound frame may wait for the socket
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered inbound message fan-out capacity
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Endpoint and retry policy for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Endpoint base, `hit/{camera}` is appended
    pub base_url: String,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_exponent: u32,
    /// Bound on one open handshake; elapsing counts as a failed open
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8000/ws/".to_string(),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_exponent: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelOptions {
    pub fn url_for(&self, camera_id: &str) -> String {
        let mut url = self.base_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("hit/");
        url.push_str(&urlencoding::encode(camera_id));
        url
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        exponential_delay(self.initial_delay, retry, self.max_exponent, self.max_delay)
    }
}

/// Published state of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub camera_id: String,
    pub ready_state: ChannelReadyState,
    /// Human-readable transient error
    pub error: Option<String>,
    /// Consecutive unexpected closes, reset on every successful open
    pub retry_count: u32,
    /// Successful opens so far; tells two distinct open periods apart
    pub open_count: u64,
    pub stopped: bool,
}

enum Command {
    Send(OutboundMessage, oneshot::Sender<Result<()>>),
    ManualReconnect,
    Stop,
}

enum Internal {
    Opened {
        generation: u64,
        conn: ChannelConnection,
    },
    ConnectFailed {
        generation: u64,
        error: AppError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        reason: Option<String>,
    },
}

/// Outbound side of a channel, usable from any task
#[derive(Clone)]
pub struct ChannelSender {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ChannelSender {
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send(message, reply_tx))
            .map_err(|_| AppError::Stopped)?;
        reply_rx.await.map_err(|_| AppError::Stopped)?
    }
}

/// Handle on a running event channel
pub struct ChannelSupervisor {
    camera_id: String,
    url: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ChannelStatus>,
    latest_rx: watch::Receiver<Option<InboundMessage>>,
    message_tx: broadcast::Sender<InboundMessage>,
    task: Option<JoinHandle<()>>,
}

impl ChannelSupervisor {
    /// Open the channel for `camera_id` and keep it open until [`stop`](Self::stop).
    pub fn start(
        camera_id: impl Into<String>,
        options: ChannelOptions,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Self> {
        let camera_id = camera_id.into();
        if camera_id.trim().is_empty() {
            return Err(AppError::Config(
                "event channel needs a camera id".to_string(),
            ));
        }

        let url = options.url_for(&camera_id);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            camera_id: camera_id.clone(),
            ready_state: ChannelReadyState::Closed,
            error: None,
            retry_count: 0,
            open_count: 0,
            stopped: false,
        });
        let (latest_tx, latest_rx) = watch::channel(None);
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);

        let session = ChannelSession {
            camera_id: camera_id.clone(),
            url: url.clone(),
            options,
            connector,
            status_tx,
            latest_tx,
            message_tx: message_tx.clone(),
            internal_tx,
            generation: 0,
            connecting: false,
            connect_task: None,
            reader: None,
            writer: None,
            retry: 0,
            retry_at: None,
            throttler: LogThrottler::with_secs(30),
        };

        info!("Starting event channel {} for camera {}", url, camera_id);
        let task = tokio::spawn(session.run(cmd_rx, internal_rx));

        Ok(Self {
            camera_id,
            url,
            cmd_tx,
            status_rx,
            latest_rx,
            message_tx,
            task: Some(task),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    /// Most recently received message; each new one replaces the last.
    pub fn latest_message(&self) -> Option<InboundMessage> {
        self.latest_rx.borrow().clone()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<InboundMessage>> {
        self.latest_rx.clone()
    }

    /// Every inbound message, in receipt order.
    pub fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.message_tx.subscribe()
    }

    /// Send now or fail with [`AppError::NotConnected`]; nothing is queued.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sender().send(message).await
    }

    /// Cloneable handle for sending from other tasks
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Reset the retry counter and reconnect now, skipping any backoff.
    /// Does nothing while a connect attempt is already in flight.
    pub fn manual_reconnect(&self) {
        let _ = self.cmd_tx.send(Command::ManualReconnect);
    }

    /// Close for good. Idempotent.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.cmd_tx.send(Command::Stop);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("Event channel {} ended abnormally: {}", self.camera_id, e);
            }
        }
    }
}

impl Drop for ChannelSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ChannelSession {
    camera_id: String,
    url: String,
    options: ChannelOptions,
    connector: Arc<dyn ChannelConnector>,
    status_tx: watch::Sender<ChannelStatus>,
    latest_tx: watch::Sender<Option<InboundMessage>>,
    message_tx: broadcast::Sender<InboundMessage>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    generation: u64,
    connecting: bool,
    connect_task: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<FrameSink>,
    retry: u32,
    retry_at: Option<Instant>,
    throttler: LogThrottler,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn read_frames(generation: u64, mut stream: FrameStream, tx: mpsc::UnboundedSender<Internal>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(text)) => {
                if tx.send(Internal::Frame { generation, text }).is_err() {
                    return;
                }
            }
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    let _ = tx.send(Internal::Closed { generation, reason });
}

impl ChannelSession {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        self.connect().await;

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(message, reply)) => {
                        let _ = reply.send(self.send(message).await);
                    }
                    Some(Command::ManualReconnect) => self.manual_reconnect().await,
                    Some(Command::Stop) | None => break,
                },
                Some(event) = internal_rx.recv() => self.handle_internal(event),
                _ = wait_until(retry_at) => {
                    self.retry_at = None;
                    self.connect().await;
                }
            }
        }

        self.shutdown().await;
    }

    fn publish(&self, f: impl FnOnce(&mut ChannelStatus)) {
        self.status_tx.send_modify(f);
    }

    /// Start a connect attempt unless one is already in flight.
    async fn connect(&mut self) {
        if self.connecting {
            debug!("Event channel {} already connecting", self.camera_id);
            return;
        }

        self.retry_at = None;
        self.teardown().await;

        self.connecting = true;
        let generation = self.generation;
        self.publish(|s| s.ready_state = ChannelReadyState::Connecting);

        let connector = self.connector.clone();
        let url = self.url.clone();
        let connect_timeout = self.options.connect_timeout;
        let tx = self.internal_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let attempt = tokio::time::timeout(connect_timeout, connector.connect(&url));
            let event = match attempt.await {
                Ok(Ok(conn)) => Internal::Opened { generation, conn },
                Ok(Err(error)) => Internal::ConnectFailed { generation, error },
                Err(_) => Internal::ConnectFailed {
                    generation,
                    error: AppError::Timeout(format!(
                        "channel handshake exceeded {:?}",
                        connect_timeout
                    )),
                },
            };
            let _ = tx.send(event);
        }));
    }

    async fn manual_reconnect(&mut self) {
        info!("Event channel {} manual reconnect", self.camera_id);
        self.retry = 0;
        self.publish(|s| {
            s.retry_count = 0;
            s.error = None;
        });
        self.connect().await;
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened { generation, conn } if generation == self.generation => {
                self.connecting = false;
                self.connect_task = None;

                let ChannelConnection { sink, stream } = conn;
                self.writer = Some(sink);
                self.reader = Some(tokio::spawn(read_frames(
                    generation,
                    stream,
                    self.internal_tx.clone(),
                )));

                self.retry = 0;
                self.throttler
                    .clear_prefix(&format!("channel:{}:", self.camera_id));
                self.publish(|s| {
                    s.ready_state = ChannelReadyState::Open;
                    s.error = None;
                    s.retry_count = 0;
                    s.open_count += 1;
                });
                info!("Event channel {} open", self.url);
            }
            Internal::ConnectFailed { generation, error } if generation == self.generation => {
                self.connecting = false;
                self.connect_task = None;
                self.on_closed(Some(error.to_string()));
            }
            Internal::Frame { generation, text } if generation == self.generation => {
                self.on_frame(&text);
            }
            Internal::Closed { generation, reason } if generation == self.generation => {
                self.writer = None;
                self.reader = None;
                self.on_closed(reason);
            }
            _ => debug_throttled!(
                self.throttler,
                &format!("channel:{}:stale", self.camera_id),
                "Dropping event from superseded channel {}",
                self.camera_id
            ),
        }
    }

    fn on_frame(&mut self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                debug!("Event channel {} received {}", self.camera_id, message.kind());
                let _ = self.message_tx.send(message.clone());
                self.latest_tx.send_replace(Some(message));
            }
            Err(e) => {
                warn!("Event channel {} message parse error: {}", self.camera_id, e);
                self.publish(|s| s.error = Some(format!("message parse error: {}", e)));
            }
        }
    }

    /// Unexpected close or failed open: schedule the next attempt.
    fn on_closed(&mut self, reason: Option<String>) {
        self.retry += 1;
        let delay = self.options.delay_for(self.retry);
        self.retry_at = Some(Instant::now() + delay);

        warn_throttled!(
            self.throttler,
            &format!("channel:{}:closed", self.camera_id),
            "Event channel {} closed ({}), retry {} in {:?}",
            self.url,
            reason.as_deref().unwrap_or("no reason"),
            self.retry,
            delay
        );

        let retry = self.retry;
        let message = format!("waiting for server, retrying in {}s", delay.as_secs_f32());
        self.publish(|s| {
            s.ready_state = ChannelReadyState::Closed;
            s.error = Some(message);
            s.retry_count = retry;
        });
    }

    async fn send(&mut self, message: OutboundMessage) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            self.publish(|s| s.error = Some("not connected".to_string()));
            return Err(AppError::NotConnected);
        };

        let text = message.to_json()?;
        match tokio::time::timeout(SEND_TIMEOUT, writer.send(text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.publish(|s| s.error = Some(format!("message send failed: {}", e)));
                Err(e)
            }
            Err(_) => {
                // A socket that stopped draining is as good as closed.
                self.teardown().await;
                self.on_closed(Some("send timed out".to_string()));
                Err(AppError::Timeout(format!(
                    "channel send exceeded {:?}",
                    SEND_TIMEOUT
                )))
            }
        }
    }

    /// Detach and close the current connection. Bumping the generation
    /// first means nothing it still has in flight is acted on.
    async fn teardown(&mut self) {
        self.generation += 1;
        self.connecting = false;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await;
        }
    }

    async fn shutdown(&mut self) {
        self.publish(|s| s.ready_state = ChannelReadyState::Closing);
        self.retry_at = None;
        self.teardown().await;
        self.publish(|s| {
            s.ready_state = ChannelReadyState::Closed;
            s.stopped = true;
        });
        info!("Event channel {} stopped", self.url);
    }
}
