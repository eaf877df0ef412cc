//! Dual camera viewing session
//!
//! Composes the two independent connection layers for one lane:
//!
//! ```text
//!  target camera ── MediaSupervisor ─┐
//!  shooter camera ─ MediaSupervisor ─┤
//!                                    ├── coordinator ── EventBus
//!  detector ─── ChannelSupervisor ───┤        │
//!                                    │   TargetScene (polygon × viewport)
//!  HitTracker <── hit messages ──────┘
//! ```
//!
//! The supervisors never see each other. The coordinator task only
//! observes their published state, rebuilds the target projection, feeds
//! hits into the tracker and announces the viewport on the channel.

mod scene;
mod status;

pub use scene::TargetScene;
pub use status::StreamingStatus;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{
    ChannelConnector, ChannelOptions, ChannelReadyState, ChannelSender, ChannelStatus,
    ChannelSupervisor, InboundMessage, OutboundMessage,
};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{CameraRole, EventBus, SystemEvent};
use crate::geometry::Viewport;
use crate::hit::{HitEvent, HitLogEntry, HitTracker};
use crate::webrtc::{MediaBackend, MediaStatus, MediaSupervisor, ReconnectOptions, VideoSink};

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    /// Target camera; also names the event channel
    pub target_camera: String,
    pub shooter_camera: String,
    pub reconnect: ReconnectOptions,
    pub channel: ChannelOptions,
    pub projection_scale: f64,
    pub grid_scale: f64,
    pub hit_display: Duration,
    pub hit_log_capacity: usize,
}

impl ViewerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target_camera: config.cameras.target.clone(),
            shooter_camera: config.cameras.shooter.clone(),
            reconnect: config.media.reconnect_options(),
            channel: config.channel.channel_options(),
            projection_scale: config.overlay.projection_scale,
            grid_scale: config.overlay.grid_scale,
            hit_display: config.overlay.hit_display_duration(),
            hit_log_capacity: config.overlay.hit_log_capacity as usize,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.target_camera.trim().is_empty() || self.shooter_camera.trim().is_empty() {
            return Err(AppError::Config(
                "both target and shooter camera ids are required".to_string(),
            ));
        }
        if self.target_camera == self.shooter_camera {
            return Err(AppError::Config(format!(
                "target and shooter cameras must differ, both are {}",
                self.target_camera
            )));
        }
        for (name, scale) in [
            ("projection", self.projection_scale),
            ("grid", self.grid_scale),
        ] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(AppError::Config(format!(
                    "{} scale must be positive, got {}",
                    name, scale
                )));
            }
        }
        Ok(())
    }
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Network collaborators for a session
#[derive(Clone)]
pub struct ViewerBackend {
    pub media: MediaBackend,
    pub connector: Arc<dyn ChannelConnector>,
}

/// One running lane: two video feeds, the detector channel and the overlay
pub struct StreamingSession {
    target: MediaSupervisor,
    shooter: MediaSupervisor,
    channel: ChannelSupervisor,
    hits: Arc<HitTracker>,
    events: Arc<EventBus>,
    viewport_tx: watch::Sender<Option<Viewport>>,
    scene_rx: watch::Receiver<TargetScene>,
    coordinator: Option<JoinHandle<()>>,
}

impl StreamingSession {
    pub fn start(
        options: ViewerOptions,
        backend: ViewerBackend,
        target_sink: Box<dyn VideoSink>,
        shooter_sink: Box<dyn VideoSink>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        options.validate()?;

        let channel = ChannelSupervisor::start(
            options.target_camera.clone(),
            options.channel.clone(),
            backend.connector,
        )?;
        let target = MediaSupervisor::start(
            options.target_camera.clone(),
            target_sink,
            options.reconnect,
            backend.media.clone(),
        )?;
        let shooter = MediaSupervisor::start(
            options.shooter_camera.clone(),
            shooter_sink,
            options.reconnect,
            backend.media,
        )?;

        let hits = Arc::new(HitTracker::new(
            options.hit_display,
            options.hit_log_capacity,
        ));
        let (viewport_tx, viewport_rx) = watch::channel(None);
        let (scene_tx, scene_rx) = watch::channel(TargetScene::default());

        let coordinator = Coordinator {
            projection_scale: options.projection_scale,
            grid_scale: options.grid_scale,
            hits: hits.clone(),
            events: events.clone(),
            sender: channel.sender(),
            scene: TargetScene::default(),
            scene_tx,
            channel: None,
            announced: None,
            target: None,
            shooter: None,
            active_hit: None,
        };
        let watches = Watches {
            messages: channel.messages(),
            viewport: viewport_rx,
            channel: channel.subscribe(),
            target: target.subscribe(),
            shooter: shooter.subscribe(),
            hit: hits.subscribe(),
        };

        info!(
            "Viewer started: target {} shooter {}",
            options.target_camera, options.shooter_camera
        );
        let coordinator = tokio::spawn(coordinator.run(watches));

        Ok(Self {
            target,
            shooter,
            channel,
            hits,
            events,
            viewport_tx,
            scene_rx,
            coordinator: Some(coordinator),
        })
    }

    /// Report the rendered size of the target video.
    pub fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        if !viewport.is_valid() {
            return Err(AppError::Config(format!(
                "invalid viewport {}x{}",
                viewport.width, viewport.height
            )));
        }
        self.viewport_tx.send_replace(Some(viewport));
        Ok(())
    }

    pub fn status(&self) -> StreamingStatus {
        StreamingStatus {
            channel: self.channel.status(),
            target: self.target.status(),
            shooter: self.shooter.status(),
        }
    }

    pub fn scene(&self) -> TargetScene {
        self.scene_rx.borrow().clone()
    }

    pub fn watch_scene(&self) -> watch::Receiver<TargetScene> {
        self.scene_rx.clone()
    }

    pub fn active_hit(&self) -> Option<HitEvent> {
        self.hits.active()
    }

    pub fn hit_log(&self) -> Vec<HitLogEntry> {
        self.hits.log()
    }

    pub fn subscribe_hits(&self) -> watch::Receiver<Option<HitEvent>> {
        self.hits.subscribe()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn target(&self) -> &MediaSupervisor {
        &self.target
    }

    pub fn shooter(&self) -> &MediaSupervisor {
        &self.shooter
    }

    pub fn channel(&self) -> &ChannelSupervisor {
        &self.channel
    }

    /// Restart every connection now, skipping any backoff.
    pub fn reconnect(&self) {
        self.channel.manual_reconnect();
        self.target.reconnect();
        self.shooter.reconnect();
    }

    /// Stop everything. Idempotent.
    pub async fn stop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        coordinator.abort();

        self.channel.stop().await;
        self.target.stop().await;
        self.shooter.stop().await;
        self.hits.clear();
        info!("Viewer stopped");
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.abort();
        }
    }
}

struct Watches {
    messages: broadcast::Receiver<InboundMessage>,
    viewport: watch::Receiver<Option<Viewport>>,
    channel: watch::Receiver<ChannelStatus>,
    target: watch::Receiver<MediaStatus>,
    shooter: watch::Receiver<MediaStatus>,
    hit: watch::Receiver<Option<HitEvent>>,
}

struct Coordinator {
    projection_scale: f64,
    grid_scale: f64,
    hits: Arc<HitTracker>,
    events: Arc<EventBus>,
    sender: ChannelSender,
    scene: TargetScene,
    scene_tx: watch::Sender<TargetScene>,
    channel: Option<ChannelStatus>,
    /// Last `video_size` sent, keyed by the open it was sent on
    announced: Option<(u64, Viewport)>,
    target: Option<MediaStatus>,
    shooter: Option<MediaStatus>,
    active_hit: Option<u64>,
}

impl Coordinator {
    async fn run(mut self, mut w: Watches) {
        // Whatever was published before this task got scheduled
        let channel = w.channel.borrow_and_update().clone();
        self.on_channel(channel).await;
        let target = w.target.borrow_and_update().clone();
        self.on_media(CameraRole::Target, target);
        let shooter = w.shooter.borrow_and_update().clone();
        self.on_media(CameraRole::Shooter, shooter);
        let viewport = *w.viewport.borrow_and_update();
        if viewport.is_some() {
            self.on_viewport(viewport).await;
        }

        loop {
            tokio::select! {
                message = w.messages.recv() => match message {
                    Ok(message) => self.on_message(message),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Viewer fell behind, skipped {} channel messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Ok(()) = w.viewport.changed() => {
                    let viewport = *w.viewport.borrow_and_update();
                    self.on_viewport(viewport).await;
                }
                Ok(()) = w.channel.changed() => {
                    let status = w.channel.borrow_and_update().clone();
                    self.on_channel(status).await;
                }
                Ok(()) = w.target.changed() => {
                    let status = w.target.borrow_and_update().clone();
                    self.on_media(CameraRole::Target, status);
                }
                Ok(()) = w.shooter.changed() => {
                    let status = w.shooter.borrow_and_update().clone();
                    self.on_media(CameraRole::Shooter, status);
                }
                Ok(()) = w.hit.changed() => {
                    let active = w.hit.borrow_and_update().as_ref().map(|hit| hit.id);
                    self.on_hit_change(active);
                }
                else => break,
            }
        }
        debug!("Viewer coordinator finished");
    }

    fn rebuild_scene(&mut self) {
        self.scene.rebuild(self.projection_scale, self.grid_scale);
        self.scene_tx.send_replace(self.scene.clone());
    }

    fn on_message(&mut self, message: InboundMessage) {
        match &message {
            InboundMessage::Polygon { points } => {
                match message.target_polygon() {
                    Some(Ok(polygon)) => self.scene.polygon = Some(polygon),
                    Some(Err(e)) => {
                        warn!("Ignoring target polygon: {}", e);
                        self.scene.polygon = None;
                    }
                    None => {}
                }
                self.rebuild_scene();

                // Without a viewport there is nothing to judge yet
                let valid = self.scene.polygon.is_some()
                    && (self.scene.viewport.is_none() || self.scene.is_ready());
                self.events.publish(SystemEvent::PolygonUpdated {
                    points: points.clone(),
                    valid,
                });
            }
            InboundMessage::Hit { .. } => {
                if let Some(hit) = self.hits.handle_message(&message) {
                    self.active_hit = Some(hit.id);
                    self.events.publish(SystemEvent::HitDetected {
                        id: hit.id,
                        tip: hit.tip,
                        inside: hit.inside,
                        target_point: self.scene.to_target(hit.tip),
                        received_at: hit.received_at,
                    });
                }
            }
        }
    }

    async fn on_viewport(&mut self, viewport: Option<Viewport>) {
        if self.scene.viewport == viewport {
            return;
        }
        self.scene.viewport = viewport;
        self.rebuild_scene();
        self.announce().await;
    }

    async fn on_channel(&mut self, status: ChannelStatus) {
        let previous = self.channel.replace(status.clone());

        if previous.as_ref().map(|p| (p.ready_state, p.open_count))
            != Some((status.ready_state, status.open_count))
        {
            self.events.publish(SystemEvent::ChannelStateChanged {
                camera_id: status.camera_id.clone(),
                state: status.ready_state,
                retry_count: status.retry_count,
            });
        }

        if let Some(message) = &status.error {
            if previous.as_ref().and_then(|p| p.error.as_ref()) != Some(message) {
                self.events.publish(SystemEvent::ChannelError {
                    camera_id: status.camera_id.clone(),
                    message: message.clone(),
                });
            }
        }

        if status.ready_state == ChannelReadyState::Open {
            self.announce().await;
        }
    }

    fn on_media(&mut self, role: CameraRole, status: MediaStatus) {
        let slot = match role {
            CameraRole::Target => &mut self.target,
            CameraRole::Shooter => &mut self.shooter,
        };
        let previous = slot.replace(status.clone());

        if previous.as_ref().map(|p| p.state) != Some(status.state) {
            self.events.publish(SystemEvent::MediaStateChanged {
                role,
                camera_id: status.camera_id.clone(),
                state: status.state,
            });
        }

        if let Some(message) = &status.error {
            if previous.as_ref().and_then(|p| p.error.as_ref()) != Some(message) {
                self.events.publish(SystemEvent::MediaError {
                    role,
                    camera_id: status.camera_id.clone(),
                    message: message.clone(),
                    terminal: status.terminal,
                });
            }
        }
    }

    fn on_hit_change(&mut self, active: Option<u64>) {
        if let (Some(id), None) = (self.active_hit, active) {
            self.events.publish(SystemEvent::HitExpired { id });
        }
        self.active_hit = active;
    }

    /// Send `video_size` unless this size was already sent on this open.
    async fn announce(&mut self) {
        let Some(viewport) = self.scene.viewport else {
            return;
        };
        let Some(channel) = &self.channel else {
            return;
        };
        if channel.ready_state != ChannelReadyState::Open {
            return;
        }
        let key = (channel.open_count, viewport);
        if self.announced == Some(key) {
            return;
        }

        // Bounded by the channel's send timeout, so a backed-up socket only
        // delays hit handling briefly and then reconnects.
        match self.sender.send(OutboundMessage::video_size(viewport)).await {
            Ok(()) => {
                debug!("Announced video size {}x{}", viewport.width, viewport.height);
                self.announced = Some(key);
            }
            Err(AppError::NotConnected) => debug!("Channel closed before video size was sent"),
            Err(e) => warn!("Failed to announce video size: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConnection;
    use crate::geometry::Point;
    use crate::webrtc::transport::TransportEventSender;
    use crate::webrtc::{
        ConnectionState, InboundStream, MediaTransport, SessionDescription, SignalingClient,
        TransportEvent, TransportFactory,
    };
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use futures::SinkExt;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Transport that reports connected as soon as the answer is applied
    struct InstantTransport {
        events: TransportEventSender,
    }

    #[async_trait]
    impl MediaTransport for InstantTransport {
        async fn add_receive_transceiver(&self) -> Result<()> {
            Ok(())
        }

        async fn create_local_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0 offer"))
        }

        async fn apply_remote_description(&self, _answer: SessionDescription) -> Result<()> {
            let _ = self
                .events
                .send(TransportEvent::StateChanged(ConnectionState::Connected));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct InstantFactory;

    #[async_trait]
    impl TransportFactory for InstantFactory {
        async fn create(
            &self,
            _camera_id: &str,
            events: TransportEventSender,
        ) -> Result<Arc<dyn MediaTransport>> {
            let transport: Arc<dyn MediaTransport> = Arc::new(InstantTransport { events });
            Ok(transport)
        }
    }

    struct EchoSignaling;

    #[async_trait]
    impl SignalingClient for EchoSignaling {
        async fn exchange_offer(
            &self,
            _camera_id: &str,
            _offer: &SessionDescription,
        ) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0 answer"))
        }
    }

    #[derive(Default)]
    struct NullSink {
        bound: bool,
    }

    #[async_trait]
    impl VideoSink for NullSink {
        fn bind(&mut self, _stream: InboundStream) {
            self.bound = true;
        }

        fn unbind(&mut self) {
            self.bound = false;
        }

        async fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_bound(&self) -> bool {
            self.bound
        }
    }

    struct Peer {
        outgoing: Option<fmpsc::UnboundedSender<Result<String>>>,
        incoming: fmpsc::UnboundedReceiver<String>,
    }

    #[derive(Default)]
    struct Detector {
        peers: Mutex<Vec<Peer>>,
    }

    impl Detector {
        fn push(&self, text: &str) {
            let peers = self.peers.lock();
            let peer = peers.last().unwrap();
            peer.outgoing
                .as_ref()
                .unwrap()
                .unbounded_send(Ok(text.to_string()))
                .unwrap();
        }

        fn received(&self, index: usize) -> Vec<serde_json::Value> {
            let mut peers = self.peers.lock();
            let mut out = vec![];
            while let Ok(Some(text)) = peers[index].incoming.try_next() {
                out.push(serde_json::from_str(&text).unwrap());
            }
            out
        }

        fn hang_up(&self) {
            if let Some(peer) = self.peers.lock().last_mut() {
                peer.outgoing = None;
            }
        }
    }

    #[async_trait]
    impl ChannelConnector for Detector {
        async fn connect(&self, _url: &str) -> Result<ChannelConnection> {
            let (to_server, incoming) = fmpsc::unbounded::<String>();
            let (outgoing, from_server) = fmpsc::unbounded::<Result<String>>();
            self.peers.lock().push(Peer {
                outgoing: Some(outgoing),
                incoming,
            });
            Ok(ChannelConnection {
                sink: Box::pin(to_server.sink_map_err(|e| AppError::Channel(e.to_string()))),
                stream: Box::pin(from_server),
            })
        }
    }

    fn start(detector: &Arc<Detector>) -> StreamingSession {
        let backend = ViewerBackend {
            media: MediaBackend {
                factory: Arc::new(InstantFactory),
                signaling: Arc::new(EchoSignaling),
                offer_timeout: Duration::from_secs(10),
            },
            connector: detector.clone(),
        };
        StreamingSession::start(
            ViewerOptions::default(),
            backend,
            Box::new(NullSink::default()),
            Box::new(NullSink::default()),
            Arc::new(EventBus::new()),
        )
        .unwrap()
    }

    async fn wait_online(session: &StreamingSession) {
        let mut channel = session.channel().subscribe();
        channel
            .wait_for(|s| s.ready_state == ChannelReadyState::Open)
            .await
            .unwrap();
        let mut target = session.target().subscribe();
        target.wait_for(|s| s.state.is_up()).await.unwrap();
        let mut shooter = session.shooter().subscribe();
        shooter.wait_for(|s| s.state.is_up()).await.unwrap();
    }

    async fn next_event(
        rx: &mut broadcast::Receiver<SystemEvent>,
        mut f: impl FnMut(&SystemEvent) -> bool,
    ) -> SystemEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if f(&event) {
                return event;
            }
        }
    }

    const SQUARE: &str = r#"{"type":"polygon","points":[[0,0],[300,0],[300,400],[0,400]]}"#;

    #[tokio::test]
    async fn test_rejects_bad_camera_ids() {
        let detector = Arc::new(Detector::default());
        let backend = || ViewerBackend {
            media: MediaBackend {
                factory: Arc::new(InstantFactory),
                signaling: Arc::new(EchoSignaling),
                offer_timeout: Duration::from_secs(10),
            },
            connector: detector.clone(),
        };

        for (target, shooter) in [("", "shooter1"), ("target1", "  "), ("lane", "lane")] {
            let options = ViewerOptions {
                target_camera: target.to_string(),
                shooter_camera: shooter.to_string(),
                ..Default::default()
            };
            let result = StreamingSession::start(
                options,
                backend(),
                Box::new(NullSink::default()),
                Box::new(NullSink::default()),
                Arc::new(EventBus::new()),
            );
            assert!(matches!(result, Err(AppError::Config(_))));
        }
        assert!(detector.peers.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_comes_online() {
        let detector = Arc::new(Detector::default());
        let mut session = start(&detector);
        let mut events = session.events().subscribe();

        wait_online(&session).await;
        let status = session.status();
        assert!(status.is_online());
        assert_eq!(status.label(), "open");
        assert!(!status.has_error());

        let shooter_up = next_event(&mut events, |e| {
            matches!(e, SystemEvent::MediaStateChanged { role: CameraRole::Shooter, state, .. } if state.is_up())
        })
        .await;
        assert!(matches!(
            shooter_up,
            SystemEvent::MediaStateChanged { camera_id, .. } if camera_id == "shooter1"
        ));

        session.stop().await;
        session.stop().await;
        assert!(session.status().channel.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_is_projected_onto_target() {
        let detector = Arc::new(Detector::default());
        let session = start(&detector);
        let mut events = session.events().subscribe();
        wait_online(&session).await;

        session.set_viewport(Viewport::new(900.0, 1200.0)).unwrap();
        let mut scene = session.watch_scene();
        scene.wait_for(|s| s.viewport.is_some()).await.unwrap();

        detector.push(SQUARE);
        let ready = scene.wait_for(|s| s.is_ready()).await.unwrap().clone();
        let rect = ready.projection.as_ref().unwrap().rect();
        assert!((rect.w - 540.0).abs() < 1e-9);
        assert!((rect.x - 180.0).abs() < 1e-9);

        let started = Instant::now();
        detector.push(r#"{"type":"hit","tip":[150,200],"inside":true}"#);
        let detected = next_event(&mut events, |e| matches!(e, SystemEvent::HitDetected { .. })).await;
        let SystemEvent::HitDetected {
            id,
            inside,
            target_point: Some(p),
            ..
        } = detected
        else {
            panic!("hit without target point: {:?}", detected);
        };
        assert!(inside);
        assert!((p.x - 270.0).abs() < 1e-6);
        assert!((p.y - 360.0).abs() < 1e-6);
        assert_eq!(session.active_hit().map(|h| h.id), Some(id));
        assert_eq!(session.hit_log().len(), 1);

        let expired = next_event(&mut events, |e| matches!(e, SystemEvent::HitExpired { .. })).await;
        assert_eq!(expired, SystemEvent::HitExpired { id });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
        assert!(session.active_hit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_polygon_clears_projection() {
        let detector = Arc::new(Detector::default());
        let session = start(&detector);
        let mut events = session.events().subscribe();
        wait_online(&session).await;
        session.set_viewport(Viewport::new(900.0, 1200.0)).unwrap();
        let mut scene = session.watch_scene();
        scene.wait_for(|s| s.viewport.is_some()).await.unwrap();

        detector.push(SQUARE);
        scene.wait_for(|s| s.is_ready()).await.unwrap();

        detector.push(r#"{"type":"polygon","points":[[0,0],[300,0],[300,400]]}"#);
        let update = next_event(&mut events, |e| {
            matches!(e, SystemEvent::PolygonUpdated { valid: false, .. })
        })
        .await;
        assert!(matches!(update, SystemEvent::PolygonUpdated { points, .. } if points.len() == 3));
        let cleared = session.scene();
        assert!(cleared.polygon.is_none());
        assert!(!cleared.is_ready());

        // A hit with no projection still counts, just without a target point
        detector.push(r#"{"type":"hit","tip":[10,10],"inside":false}"#);
        let detected = next_event(&mut events, |e| matches!(e, SystemEvent::HitDetected { .. })).await;
        assert!(matches!(
            detected,
            SystemEvent::HitDetected { target_point: None, tip, .. } if tip == Point::new(10.0, 10.0)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_size_announced_once_per_open() {
        let detector = Arc::new(Detector::default());
        let session = start(&detector);
        let mut channel = session.channel().subscribe();
        wait_online(&session).await;

        session.set_viewport(Viewport::new(900.0, 1200.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = detector.received(0);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "video_size");
        assert_eq!(sent[0]["width"], 900.0);
        assert_eq!(sent[0]["height"], 1200.0);

        // Same size again: nothing new
        session.set_viewport(Viewport::new(900.0, 1200.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(detector.received(0).is_empty());

        session.set_viewport(Viewport::new(600.0, 800.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = detector.received(0);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["width"], 600.0);

        // Reopened channel gets the current size again
        detector.hang_up();
        channel
            .wait_for(|s| s.ready_state == ChannelReadyState::Open && s.open_count == 2)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = detector.received(1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["width"], 600.0);
        assert_eq!(sent[0]["height"], 800.0);
    }

    #[tokio::test]
    async fn test_invalid_viewport_is_refused() {
        let detector = Arc::new(Detector::default());
        let session = start(&detector);
        assert!(matches!(
            session.set_viewport(Viewport::new(0.0, 1200.0)),
            Err(AppError::Config(_))
        ));
        assert!(session.scene().viewport.is_none());
    }
}
