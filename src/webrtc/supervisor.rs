//! Media connection supervisor
//!
//! One actor task per camera owns the transport, the display sink and the
//! retry timer. [`MediaSupervisor`] is the handle: it sends commands in and
//! reads the published [`MediaStatus`] out.
//!
//! Connect cycle:
//!
//! 1. Tear down the previous transport (detach its events, close it) and
//!    unbind the sink.
//! 2. Give up for good if the attempt cap is reached.
//! 3. Build a new transport; its observers are live before negotiation.
//! 4. Add a receive-only transceiver, create and commit the offer, post it
//!    to signaling (bounded by the offer timeout), apply the answer.
//! 5. `connected`/`completed` reset the attempt counter. `failed`,
//!    `disconnected`, negotiation errors and playback errors schedule a
//!    retry after `min(base * attempts, max)`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::signaling::{ConnectionState, SignalingClient};
use super::sink::VideoSink;
use super::transport::{MediaTransport, TransportEvent, TransportFactory};
use crate::error::{AppError, Result};
use crate::utils::{linear_delay, LogThrottler};
use crate::warn_throttled;

/// Default bound on the offer/answer HTTP exchange
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for one media session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectOptions {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        linear_delay(self.base_delay, attempt, self.max_delay)
    }
}

/// Collaborators shared by every media session
#[derive(Clone)]
pub struct MediaBackend {
    pub factory: Arc<dyn TransportFactory>,
    pub signaling: Arc<dyn SignalingClient>,
    pub offer_timeout: Duration,
}

/// Published state of one media session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaStatus {
    pub camera_id: String,
    pub state: ConnectionState,
    /// Human-readable transient error
    pub error: Option<String>,
    pub attempts: u32,
    /// Negotiation in flight
    pub connecting: bool,
    /// Attempt cap reached, no further retries
    pub terminal: bool,
    pub stopped: bool,
}

impl MediaStatus {
    fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            state: ConnectionState::New,
            error: None,
            attempts: 0,
            connecting: true,
            terminal: false,
            stopped: false,
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Stop,
}

/// Handle on a running media session
pub struct MediaSupervisor {
    camera_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<MediaStatus>,
    task: Option<JoinHandle<()>>,
}

impl MediaSupervisor {
    /// Begin a managed session for `camera_id`, streaming into `sink`.
    pub fn start(
        camera_id: impl Into<String>,
        sink: Box<dyn VideoSink>,
        options: ReconnectOptions,
        backend: MediaBackend,
    ) -> Result<Self> {
        let camera_id = camera_id.into();
        if camera_id.trim().is_empty() {
            return Err(AppError::Config(
                "media session needs a camera id".to_string(),
            ));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(MediaStatus::new(&camera_id));

        let session = MediaSession {
            camera_id: camera_id.clone(),
            sink,
            options,
            backend,
            status_tx,
            transport: None,
            events: None,
            attempts: 0,
            retry_at: None,
            throttler: LogThrottler::with_secs(30),
        };

        info!("Starting media session for camera {}", camera_id);
        let task = tokio::spawn(session.run(cmd_rx));

        Ok(Self {
            camera_id,
            cmd_tx,
            status_rx,
            task: Some(task),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn status(&self) -> MediaStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaStatus> {
        self.status_rx.clone()
    }

    /// Reset the attempt counter and renegotiate now, skipping any backoff.
    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect);
    }

    /// Tear the session down for good. Idempotent.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.cmd_tx.send(Command::Stop);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("Media session {} ended abnormally: {}", self.camera_id, e);
            }
        }
    }
}

impl Drop for MediaSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Flow {
    Continue,
    Restart,
    Stop,
}

impl Flow {
    fn from_command(cmd: Option<Command>) -> Self {
        match cmd {
            Some(Command::Reconnect) => Flow::Restart,
            Some(Command::Stop) | None => Flow::Stop,
        }
    }
}

struct MediaSession {
    camera_id: String,
    sink: Box<dyn VideoSink>,
    options: ReconnectOptions,
    backend: MediaBackend,
    status_tx: watch::Sender<MediaStatus>,
    transport: Option<Arc<dyn MediaTransport>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    attempts: u32,
    retry_at: Option<Instant>,
    throttler: LogThrottler,
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl MediaSession {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        let mut flow = self.connect(&mut cmd_rx).await;

        loop {
            match flow {
                Flow::Stop => break,
                Flow::Restart => {
                    info!("Camera {} reconnect requested", self.camera_id);
                    self.attempts = 0;
                    self.retry_at = None;
                    self.publish(|s| {
                        s.attempts = 0;
                        s.error = None;
                        s.terminal = false;
                    });
                    flow = self.connect(&mut cmd_rx).await;
                    continue;
                }
                Flow::Continue => {}
            }

            let retry_at = self.retry_at;
            flow = tokio::select! {
                cmd = cmd_rx.recv() => Flow::from_command(cmd),
                event = next_event(&mut self.events) => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        // Transport dropped its sender; nothing more will arrive
                        None => self.events = None,
                    }
                    Flow::Continue
                }
                _ = wait_until(retry_at) => {
                    self.retry_at = None;
                    self.connect(&mut cmd_rx).await
                }
            };
        }

        self.shutdown().await;
    }

    fn publish(&self, f: impl FnOnce(&mut MediaStatus)) {
        self.status_tx.send_modify(f);
    }

    async fn connect(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> Flow {
        self.teardown().await;

        if let Some(max) = self.options.max_attempts {
            if self.attempts >= max {
                let message = format!(
                    "connection failed: exceeded maximum retry attempts ({})",
                    max
                );
                warn!("Camera {} {}", self.camera_id, message);
                self.publish(|s| {
                    s.error = Some(message);
                    s.connecting = false;
                    s.terminal = true;
                });
                return Flow::Continue;
            }
        }

        self.publish(|s| {
            s.connecting = true;
            s.error = None;
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match self.backend.factory.create(&self.camera_id, events_tx).await {
            Ok(transport) => transport,
            Err(e) if !e.is_retryable() => {
                let message = format!("connection failed: {}", e);
                warn!("Camera {} {}", self.camera_id, message);
                self.publish(|s| {
                    s.error = Some(message);
                    s.connecting = false;
                    s.terminal = true;
                });
                return Flow::Continue;
            }
            Err(e) => {
                self.schedule_retry(format!("connection failed: {}", e));
                return Flow::Continue;
            }
        };
        self.transport = Some(transport.clone());
        self.events = Some(events_rx);

        let negotiation = negotiate(
            transport,
            self.backend.signaling.clone(),
            self.camera_id.clone(),
            self.backend.offer_timeout,
        );

        // Commands still get through while waiting on signaling.
        let result = tokio::select! {
            result = negotiation => result,
            cmd = cmd_rx.recv() => return Flow::from_command(cmd),
        };

        match result {
            Ok(()) => {
                debug!("Camera {} offer/answer complete", self.camera_id);
                self.publish(|s| s.connecting = false);
            }
            Err(e) => self.schedule_retry(format!("connection failed: {}", e)),
        }

        Flow::Continue
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                info!("Camera {} connection state: {}", self.camera_id, state);
                self.publish(|s| s.state = state);

                if state.is_up() {
                    // Next failure after a recovery is always worth a line
                    self.throttler.clear(&format!("media:{}", self.camera_id));
                    self.attempts = 0;
                    self.retry_at = None;
                    self.publish(|s| {
                        s.attempts = 0;
                        s.error = None;
                        s.connecting = false;
                    });
                } else if state.is_broken() {
                    self.schedule_retry("connection problem");
                }
            }
            TransportEvent::Track(stream) => {
                self.sink.unbind();
                self.sink.bind(stream);
                if let Err(e) = self.sink.play().await {
                    self.schedule_retry(format!("video playback failed: {}", e));
                }
            }
        }
    }

    /// Arm the retry timer unless one is already pending.
    fn schedule_retry(&mut self, reason: impl Into<String>) {
        if self.retry_at.is_some() {
            return;
        }

        self.attempts += 1;
        let delay = self.options.delay_for(self.attempts);
        self.retry_at = Some(Instant::now() + delay);

        let message = format!("{}, retrying in {}s", reason.into(), delay.as_secs_f32());
        warn_throttled!(
            self.throttler,
            &format!("media:{}", self.camera_id),
            "Camera {} {} (attempt {})",
            self.camera_id,
            message,
            self.attempts
        );

        let attempts = self.attempts;
        self.publish(|s| {
            s.error = Some(message);
            s.attempts = attempts;
            s.connecting = false;
        });
    }

    /// Detach and close the current transport, then release the sink.
    async fn teardown(&mut self) {
        self.events = None;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Camera {} transport close failed: {}", self.camera_id, e);
            }
        }
        self.sink.unbind();
    }

    async fn shutdown(&mut self) {
        self.retry_at = None;
        self.teardown().await;
        self.publish(|s| {
            s.connecting = false;
            s.stopped = true;
        });
        info!("Media session for camera {} stopped", self.camera_id);
    }
}

async fn negotiate(
    transport: Arc<dyn MediaTransport>,
    signaling: Arc<dyn SignalingClient>,
    camera_id: String,
    offer_timeout: Duration,
) -> Result<()> {
    transport.add_receive_transceiver().await?;
    let offer = transport.create_local_offer().await?;

    let answer = tokio::time::timeout(offer_timeout, signaling.exchange_offer(&camera_id, &offer))
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "no answer from signaling within {}ms",
                offer_timeout.as_millis()
            ))
        })??;

    transport.apply_remote_description(answer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::signaling::SessionDescription;
    use crate::webrtc::sink::{InboundStream, StreamSource};
    use crate::webrtc::transport::TransportEventSender;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeTransport {
        closed: AtomicBool,
        live: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn add_receive_transceiver(&self) -> Result<()> {
            Ok(())
        }

        async fn create_local_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0 offer"))
        }

        async fn apply_remote_description(&self, _answer: SessionDescription) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct Created {
        at: Instant,
        events: TransportEventSender,
        transport: Arc<FakeTransport>,
    }

    #[derive(Default)]
    struct FakeFactory {
        created: Mutex<Vec<Created>>,
        live: Arc<AtomicUsize>,
        max_live: AtomicUsize,
    }

    impl FakeFactory {
        fn count(&self) -> usize {
            self.created.lock().len()
        }

        fn events(&self, index: usize) -> TransportEventSender {
            self.created.lock()[index].events.clone()
        }

        fn is_closed(&self, index: usize) -> bool {
            self.created.lock()[index].transport.closed.load(Ordering::SeqCst)
        }

        fn gaps(&self) -> Vec<Duration> {
            let created = self.created.lock();
            created.windows(2).map(|w| w[1].at - w[0].at).collect()
        }
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            _camera_id: &str,
            events: TransportEventSender,
        ) -> Result<Arc<dyn MediaTransport>> {
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);

            let fake = Arc::new(FakeTransport {
                closed: AtomicBool::new(false),
                live: self.live.clone(),
            });
            self.created.lock().push(Created {
                at: Instant::now(),
                events,
                transport: fake.clone(),
            });

            let transport: Arc<dyn MediaTransport> = fake;
            Ok(transport)
        }
    }

    #[derive(Clone, Copy)]
    enum Answer {
        Accept,
        Reject,
        Hang,
    }

    struct FakeSignaling {
        script: Mutex<VecDeque<Answer>>,
        fallback: Answer,
    }

    impl FakeSignaling {
        fn scripted(script: &[Answer], fallback: Answer) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
            })
        }

        fn always(answer: Answer) -> Arc<Self> {
            Self::scripted(&[], answer)
        }
    }

    #[async_trait]
    impl SignalingClient for FakeSignaling {
        async fn exchange_offer(
            &self,
            _camera_id: &str,
            _offer: &SessionDescription,
        ) -> Result<SessionDescription> {
            let next = self.script.lock().pop_front().unwrap_or(self.fallback);
            match next {
                Answer::Accept => Ok(SessionDescription::answer("v=0 answer")),
                Answer::Reject => Err(AppError::Negotiation(
                    "Invalid answer from server".to_string(),
                )),
                Answer::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Clone, Default)]
    struct SinkProbe {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_play: Arc<AtomicBool>,
    }

    impl SinkProbe {
        fn last_calls(&self, n: usize) -> Vec<&'static str> {
            let calls = self.calls.lock();
            calls[calls.len().saturating_sub(n)..].to_vec()
        }
    }

    struct FakeSink {
        probe: SinkProbe,
        bound: bool,
    }

    #[async_trait]
    impl VideoSink for FakeSink {
        fn bind(&mut self, _stream: InboundStream) {
            self.probe.calls.lock().push("bind");
            self.bound = true;
        }

        fn unbind(&mut self) {
            self.probe.calls.lock().push("unbind");
            self.bound = false;
        }

        async fn play(&mut self) -> Result<()> {
            self.probe.calls.lock().push("play");
            if self.probe.fail_play.load(Ordering::SeqCst) {
                Err(AppError::Playback("autoplay blocked".to_string()))
            } else {
                Ok(())
            }
        }

        fn is_bound(&self) -> bool {
            self.bound
        }
    }

    fn options(max_attempts: Option<u32>, max_delay_secs: u64) -> ReconnectOptions {
        ReconnectOptions {
            max_attempts,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(max_delay_secs),
        }
    }

    fn start(
        factory: &Arc<FakeFactory>,
        signaling: Arc<FakeSignaling>,
        options: ReconnectOptions,
        probe: &SinkProbe,
    ) -> MediaSupervisor {
        let sink = FakeSink {
            probe: probe.clone(),
            bound: false,
        };
        MediaSupervisor::start(
            "target1",
            Box::new(sink),
            options,
            MediaBackend {
                factory: factory.clone(),
                signaling,
                offer_timeout: DEFAULT_OFFER_TIMEOUT,
            },
        )
        .unwrap()
    }

    async fn wait_for(
        rx: &mut watch::Receiver<MediaStatus>,
        f: impl FnMut(&MediaStatus) -> bool,
    ) -> MediaStatus {
        rx.wait_for(f).await.unwrap().clone()
    }

    fn negotiated(s: &MediaStatus) -> bool {
        !s.connecting && s.error.is_none()
    }

    fn detached_stream() -> InboundStream {
        InboundStream {
            stream_id: "cam".to_string(),
            track_id: "video0".to_string(),
            source: StreamSource::Detached,
        }
    }

    #[tokio::test]
    async fn test_empty_camera_id_is_refused() {
        let factory = Arc::new(FakeFactory::default());
        let result = MediaSupervisor::start(
            "  ",
            Box::new(FakeSink {
                probe: SinkProbe::default(),
                bound: false,
            }),
            ReconnectOptions::default(),
            MediaBackend {
                factory: factory.clone(),
                signaling: FakeSignaling::always(Answer::Accept),
                offer_timeout: DEFAULT_OFFER_TIMEOUT,
            },
        );
        assert!(matches!(result, Err(AppError::Config(_))));
        assert_eq!(factory.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_resets_attempts_and_clears_error() {
        let factory = Arc::new(FakeFactory::default());
        let signaling = FakeSignaling::scripted(&[Answer::Reject, Answer::Reject], Answer::Accept);
        let probe = SinkProbe::default();
        let sup = start(&factory, signaling, options(None, 30), &probe);
        let mut rx = sup.subscribe();

        let failed = wait_for(&mut rx, |s| s.attempts == 1).await;
        assert!(failed.error.unwrap().contains("retrying in 2s"));

        wait_for(&mut rx, |s| s.attempts == 2 && negotiated(s)).await;
        assert_eq!(factory.count(), 3);
        assert_eq!(
            factory.gaps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );

        factory
            .events(2)
            .send(TransportEvent::StateChanged(ConnectionState::Connected))
            .unwrap();
        let up = wait_for(&mut rx, |s| s.state == ConnectionState::Connected).await;
        assert_eq!(up.attempts, 0);
        assert!(up.error.is_none());
        assert_eq!(factory.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear_then_capped() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let sup = start(
            &factory,
            FakeSignaling::always(Answer::Reject),
            options(None, 5),
            &probe,
        );
        let mut rx = sup.subscribe();

        wait_for(&mut rx, |s| s.attempts == 5).await;
        let secs: Vec<u64> = factory.gaps().iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 5, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_is_terminal() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let sup = start(
            &factory,
            FakeSignaling::always(Answer::Reject),
            options(Some(2), 30),
            &probe,
        );
        let mut rx = sup.subscribe();

        let terminal = wait_for(&mut rx, |s| s.terminal).await;
        assert!(terminal.error.unwrap().contains("maximum retry attempts (2)"));
        assert!(!terminal.connecting);
        assert_eq!(factory.count(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(factory.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ignores_late_failure() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let mut sup = start(
            &factory,
            FakeSignaling::always(Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, negotiated).await;

        let events = factory.events(0);
        sup.stop().await;
        sup.stop().await;

        assert!(events
            .send(TransportEvent::StateChanged(ConnectionState::Failed))
            .is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(factory.count(), 1);
        assert!(factory.is_closed(0));
        assert_eq!(probe.last_calls(1), vec!["unbind"]);
        assert!(sup.status().stopped);
        sup.reconnect();
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let mut sup = start(
            &factory,
            FakeSignaling::always(Answer::Reject),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, |s| s.attempts == 1).await;

        sup.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_timeout_schedules_retry() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let started = Instant::now();
        let sup = start(
            &factory,
            FakeSignaling::scripted(&[Answer::Hang], Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();

        let timed_out = wait_for(&mut rx, |s| s.attempts == 1).await;
        assert!(timed_out.error.unwrap().contains("Timed out"));
        assert_eq!(started.elapsed(), DEFAULT_OFFER_TIMEOUT);

        wait_for(&mut rx, negotiated).await;
        assert_eq!(factory.gaps(), vec![Duration::from_secs(12)]);
        assert!(factory.is_closed(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_schedules_a_single_retry() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let sup = start(
            &factory,
            FakeSignaling::always(Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, negotiated).await;

        let events = factory.events(0);
        events
            .send(TransportEvent::StateChanged(ConnectionState::Disconnected))
            .unwrap();
        events
            .send(TransportEvent::StateChanged(ConnectionState::Failed))
            .unwrap();

        let retrying = wait_for(&mut rx, |s| s.state == ConnectionState::Failed).await;
        assert_eq!(retrying.attempts, 1);
        assert!(retrying.error.unwrap().starts_with("connection problem"));

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(factory.count(), 2);
        assert!(factory.is_closed(0));
        assert_eq!(factory.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(sup.status().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_is_bound_then_played() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let sup = start(
            &factory,
            FakeSignaling::always(Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, negotiated).await;

        factory
            .events(0)
            .send(TransportEvent::Track(detached_stream()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(probe.last_calls(3), vec!["unbind", "bind", "play"]);
        assert!(sup.status().error.is_none());
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_schedules_retry() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        probe.fail_play.store(true, Ordering::SeqCst);
        let sup = start(
            &factory,
            FakeSignaling::always(Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, negotiated).await;

        factory
            .events(0)
            .send(TransportEvent::Track(detached_stream()))
            .unwrap();
        let failed = wait_for(&mut rx, |s| s.attempts == 1).await;
        assert!(failed.error.unwrap().contains("video playback failed"));

        wait_for(&mut rx, |s| negotiated(s) && s.attempts == 1).await;
        assert_eq!(factory.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resets_attempts_and_skips_backoff() {
        let factory = Arc::new(FakeFactory::default());
        let probe = SinkProbe::default();
        let started = Instant::now();
        let sup = start(
            &factory,
            FakeSignaling::scripted(&[Answer::Reject, Answer::Reject], Answer::Accept),
            options(None, 30),
            &probe,
        );
        let mut rx = sup.subscribe();
        wait_for(&mut rx, |s| s.attempts == 1).await;

        sup.reconnect();
        let counter = factory.clone();
        wait_for(&mut rx, move |s| s.attempts == 1 && counter.count() == 2).await;
        assert!(started.elapsed() < Duration::from_secs(2));

        // Back on the normal schedule after the manual attempt.
        wait_for(&mut rx, negotiated).await;
        assert_eq!(factory.gaps()[1], Duration::from_secs(2));
    }
}
