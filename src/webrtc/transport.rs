//! Peer connection transport
//!
//! [`MediaTransport`] is the narrow surface the supervisor drives: add a
//! receive-only transceiver, produce an offer, apply the answer, close.
//! Connectivity changes and inbound tracks are pushed into the per-transport
//! event channel handed to [`TransportFactory::create`]; observers are
//! registered before the transport is returned, so no transition is missed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use super::config::RtcConfig;
use super::mdns::{default_mdns_host_name, mdns_mode, mdns_mode_label};
use super::signaling::{ConnectionState, SdpType, SessionDescription};
use super::sink::InboundStream;
use crate::error::{AppError, Result};

/// Something a live transport reports back to its owner
#[derive(Debug)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Track(InboundStream),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// One negotiated (or negotiating) peer session
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Request a receive-only video transceiver.
    async fn add_receive_transceiver(&self) -> Result<()>;

    /// Create an offer, commit it as the local description and return it
    /// with all candidates gathered.
    async fn create_local_offer(&self) -> Result<SessionDescription>;

    async fn apply_remote_description(&self, answer: SessionDescription) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds a fresh transport per connect attempt
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        camera_id: &str,
        events: TransportEventSender,
    ) -> Result<Arc<dyn MediaTransport>>;
}

pub fn ice_state_to_connection_state(state: RTCIceConnectionState) -> Option<ConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectionState::New),
        RTCIceConnectionState::Checking => Some(ConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(ConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(ConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// [`TransportFactory`] backed by webrtc-rs
pub struct RtcTransportFactory {
    config: RtcConfig,
}

impl RtcTransportFactory {
    pub fn new(config: RtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        camera_id: &str,
        events: TransportEventSender,
    ) -> Result<Arc<dyn MediaTransport>> {
        let transport = RtcTransport::new(&self.config, camera_id, events).await?;
        Ok(Arc::new(transport))
    }
}

/// Receive-only peer connection
pub struct RtcTransport {
    session_id: String,
    camera_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl RtcTransport {
    pub async fn new(
        config: &RtcConfig,
        camera_id: &str,
        events: TransportEventSender,
    ) -> Result<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(default_mdns_host_name(&session_id));
        }
        debug!(
            "Camera {} mDNS mode: {} (session {})",
            camera_id,
            mdns_mode_label(mode),
            session_id
        );

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let transport = Self {
            session_id,
            camera_id: camera_id.to_string(),
            pc: Arc::new(pc),
        };
        transport.setup_event_handlers(events);

        Ok(transport)
    }

    /// Forward ICE state changes and inbound tracks to the owner.
    ///
    /// Sends fail silently once the owner has dropped its receiver, which
    /// is how a superseded transport is detached.
    fn setup_event_handlers(&self, events: TransportEventSender) {
        let state_events = events.clone();
        let camera_id = self.camera_id.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                let events = state_events.clone();
                let camera_id = camera_id.clone();

                Box::pin(async move {
                    let Some(state) = ice_state_to_connection_state(s) else {
                        return;
                    };
                    debug!("Camera {} ICE state: {}", camera_id, state);
                    let _ = events.send(TransportEvent::StateChanged(state));
                })
            }));

        let camera_id = self.camera_id.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let camera_id = camera_id.clone();

                Box::pin(async move {
                    if track.kind() != RTPCodecType::Video {
                        debug!("Camera {} ignoring {} track", camera_id, track.kind());
                        return;
                    }
                    info!(
                        "Camera {} received video track {} (stream {})",
                        camera_id,
                        track.id(),
                        track.stream_id()
                    );
                    let _ = events.send(TransportEvent::Track(InboundStream::from_track(track)));
                })
            },
        ));
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn add_receive_transceiver(&self) -> Result<()> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add transceiver: {}", e)))?;
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create offer: {}", e)))?;

        // The answer comes back in one HTTP response, so gather everything
        // before handing the offer over.
        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;

        let _ = gather_complete.recv().await;

        let local = self.pc.local_description().await.ok_or_else(|| {
            AppError::Negotiation("Local description missing after gathering".to_string())
        })?;

        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_remote_description(&self, answer: SessionDescription) -> Result<()> {
        let remote = match answer.sdp_type {
            SdpType::Answer => RTCSessionDescription::answer(answer.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(answer.sdp),
            other => {
                return Err(AppError::Negotiation(format!(
                    "Cannot apply {} as remote description",
                    other
                )))
            }
        }
        .map_err(|e| AppError::Negotiation(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_remote_description(remote).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to set remote description: {}", e))
        })?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        debug!("Camera {} session {} closed", self.camera_id, self.session_id);
        Ok(())
    }
}
