//! Viewer event types
//!
//! Everything the viewer broadcasts through the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelReadyState;
use crate::geometry::Point;
use crate::webrtc::ConnectionState;

/// Which of the two video feeds an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraRole {
    /// Faces the target; its id also scopes the event channel
    Target,
    Shooter,
}

impl std::fmt::Display for CameraRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Shooter => write!(f, "shooter"),
        }
    }
}

/// Viewer event, serialized as
///
/// ```json
/// {
///   "event": "media.state_changed",
///   "data": { "role": "target", "camera_id": "target1", "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Media Events
    // ============================================================================
    /// Peer connectivity changed for one camera
    #[serde(rename = "media.state_changed")]
    MediaStateChanged {
        role: CameraRole,
        camera_id: String,
        state: ConnectionState,
    },

    /// A camera session reported a new error (retry wait, playback, cap)
    #[serde(rename = "media.error")]
    MediaError {
        role: CameraRole,
        camera_id: String,
        message: String,
        /// No further attempts will be made
        terminal: bool,
    },

    // ============================================================================
    // Channel Events
    // ============================================================================
    #[serde(rename = "channel.state_changed")]
    ChannelStateChanged {
        camera_id: String,
        state: ChannelReadyState,
        retry_count: u32,
    },

    #[serde(rename = "channel.error")]
    ChannelError { camera_id: String, message: String },

    // ============================================================================
    // Target / Hit Events
    // ============================================================================
    /// A new target outline arrived. `valid` is false when it was rejected
    /// (wrong corner count, or degenerate for the current viewport).
    #[serde(rename = "target.polygon_updated")]
    PolygonUpdated { points: Vec<Point>, valid: bool },

    #[serde(rename = "hit.detected")]
    HitDetected {
        id: u64,
        tip: Point,
        inside: bool,
        /// Tip in target rectangle coordinates, when a projection exists
        #[serde(skip_serializing_if = "Option::is_none", default)]
        target_point: Option<Point>,
        received_at: DateTime<Utc>,
    },

    /// The active hit timed out
    #[serde(rename = "hit.expired")]
    HitExpired { id: u64 },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MediaStateChanged { .. } => "media.state_changed",
            Self::MediaError { .. } => "media.error",
            Self::ChannelStateChanged { .. } => "channel.state_changed",
            Self::ChannelError { .. } => "channel.error",
            Self::PolygonUpdated { .. } => "target.polygon_updated",
            Self::HitDetected { .. } => "hit.detected",
            Self::HitExpired { .. } => "hit.expired",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `media.*` matches all media events
    /// - `hit.detected` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
