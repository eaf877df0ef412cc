//! Receive-only WebRTC video with automatic recovery
//!
//! Architecture:
//! ```text
//! MediaSupervisor (one actor per camera)
//!        |
//!        +--- TransportFactory --> MediaTransport (RTCPeerConnection, recvonly)
//!        |                                |
//!        |       ICE state / on_track     |
//!        |<-------------------------------+
//!        |
//!        +--- SignalingClient ---- POST /webrtc/offer/{camera} ----> backend
//!        |
//!        +--- VideoSink (unbind -> bind -> play)
//! ```

pub mod config;
pub mod mdns;
pub mod signaling;
pub mod sink;
pub mod supervisor;
pub mod transport;

pub use config::{RtcConfig, TurnServer};
pub use signaling::{ConnectionState, HttpSignaling, SessionDescription, SignalingClient};
pub use sink::{InboundStream, RtpFrameSink, SinkStats, VideoFrame, VideoSink};
pub use supervisor::{MediaBackend, MediaStatus, MediaSupervisor, ReconnectOptions};
pub use transport::{MediaTransport, RtcTransportFactory, TransportEvent, TransportFactory};
