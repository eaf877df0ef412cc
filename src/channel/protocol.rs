//! Hit channel wire protocol
//!
//! JSON text frames, discriminated by a `type` field:
//!
//! ```json
//! {"type": "polygon", "points": [[x, y], [x, y], [x, y], [x, y]]}
//! {"type": "hit", "tip": [x, y], "inside": true}
//! {"type": "video_size", "width": 900, "height": 1200}
//! ```

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::error::Result;
use crate::geometry::{Point, TargetPolygon, Viewport};

/// Messages pushed by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Target outline in target-camera pixel space
    Polygon { points: Vec<Point> },
    /// Arrow tip and whether it landed inside the target
    Hit { tip: Point, inside: bool },
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The polygon carried by a `polygon` message, if it is well formed.
    pub fn target_polygon(&self) -> Option<Result<TargetPolygon>> {
        match self {
            InboundMessage::Polygon { points } => Some(TargetPolygon::from_points(points)),
            InboundMessage::Hit { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Polygon { .. } => "polygon",
            InboundMessage::Hit { .. } => "hit",
        }
    }
}

/// Messages sent by the viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Rendered size of the target video, so the detector can scale its output
    VideoSize { width: f64, height: f64 },
}

impl OutboundMessage {
    pub fn video_size(viewport: Viewport) -> Self {
        OutboundMessage::VideoSize {
            width: viewport.width,
            height: viewport.height,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Duplex channel ready state
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ChannelReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelReadyState::Connecting => write!(f, "connecting"),
            ChannelReadyState::Open => write!(f, "open"),
            ChannelReadyState::Closing => write!(f, "closing"),
            ChannelReadyState::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_parse_hit() {
        let msg = InboundMessage::parse(r#"{"type":"hit","tip":[150,200],"inside":true}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Hit {
                tip: Point::new(150.0, 200.0),
                inside: true
            }
        );
        assert_eq!(msg.kind(), "hit");
        assert!(msg.target_polygon().is_none());
    }

    #[test]
    fn test_parse_polygon() {
        let msg = InboundMessage::parse(
            r#"{"type":"polygon","points":[[0,0],[300,0],[300,400],[0,400]]}"#,
        )
        .unwrap();
        let polygon = msg.target_polygon().unwrap().unwrap();
        assert_eq!(polygon.corners()[2], Point::new(300.0, 400.0));
    }

    #[test]
    fn test_short_polygon_is_rejected_at_use() {
        let msg = InboundMessage::parse(r#"{"type":"polygon","points":[[0,0],[1,1]]}"#).unwrap();
        assert!(matches!(
            msg.target_polygon(),
            Some(Err(AppError::DegenerateGeometry(_)))
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(InboundMessage::parse("not json").is_err());
        assert!(InboundMessage::parse(r#"{"type":"score","value":10}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":"hit","tip":[1,2]}"#).is_err());
    }

    #[test]
    fn test_video_size_wire_format() {
        let json = OutboundMessage::video_size(Viewport::new(900.0, 1200.5))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "video_size");
        assert_eq!(value["width"], 900.0);
        assert_eq!(value["height"], 1200.5);
    }
}
