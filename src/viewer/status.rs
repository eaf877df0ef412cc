//! Aggregated health of one viewing session

use serde::Serialize;

use crate::channel::{ChannelReadyState, ChannelStatus};
use crate::webrtc::MediaStatus;

/// Channel plus both cameras, as one value the presentation can render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingStatus {
    pub channel: ChannelStatus,
    pub target: MediaStatus,
    pub shooter: MediaStatus,
}

impl StreamingStatus {
    /// `connecting`, `open`, `closing` or `closed`
    pub fn label(&self) -> String {
        self.channel.ready_state.to_string()
    }

    /// The error worth showing first: channel, then target, then shooter.
    pub fn current_error(&self) -> Option<&str> {
        self.channel
            .error
            .as_deref()
            .or(self.target.error.as_deref())
            .or(self.shooter.error.as_deref())
    }

    pub fn has_error(&self) -> bool {
        self.current_error().is_some()
    }

    /// Channel open and both cameras connected
    pub fn is_online(&self) -> bool {
        self.channel.ready_state == ChannelReadyState::Open
            && self.target.state.is_up()
            && self.shooter.state.is_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::ConnectionState;

    fn media(camera_id: &str, state: ConnectionState, error: Option<&str>) -> MediaStatus {
        MediaStatus {
            camera_id: camera_id.to_string(),
            state,
            error: error.map(str::to_string),
            attempts: 0,
            connecting: false,
            terminal: false,
            stopped: false,
        }
    }

    fn channel(ready_state: ChannelReadyState, error: Option<&str>) -> ChannelStatus {
        ChannelStatus {
            camera_id: "target1".to_string(),
            ready_state,
            error: error.map(str::to_string),
            retry_count: 0,
            open_count: 1,
            stopped: false,
        }
    }

    #[test]
    fn test_online_needs_everything_up() {
        let mut status = StreamingStatus {
            channel: channel(ChannelReadyState::Open, None),
            target: media("target1", ConnectionState::Connected, None),
            shooter: media("shooter1", ConnectionState::Completed, None),
        };
        assert!(status.is_online());
        assert_eq!(status.label(), "open");
        assert!(!status.has_error());

        status.shooter.state = ConnectionState::Checking;
        assert!(!status.is_online());

        status.shooter.state = ConnectionState::Connected;
        status.channel.ready_state = ChannelReadyState::Connecting;
        assert!(!status.is_online());
        assert_eq!(status.label(), "connecting");
    }

    #[test]
    fn test_error_priority() {
        let mut status = StreamingStatus {
            channel: channel(ChannelReadyState::Closed, Some("waiting for server, retrying in 2s")),
            target: media("target1", ConnectionState::Failed, Some("connection problem")),
            shooter: media("shooter1", ConnectionState::Failed, Some("video playback failed")),
        };
        assert_eq!(status.current_error(), Some("waiting for server, retrying in 2s"));

        status.channel.error = None;
        assert_eq!(status.current_error(), Some("connection problem"));

        status.target.error = None;
        assert_eq!(status.current_error(), Some("video playback failed"));

        status.shooter.error = None;
        assert!(!status.has_error());
    }
}
