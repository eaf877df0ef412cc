//! Offer/answer exchange with the signaling backend
//!
//! The viewer posts its complete (non-trickle) offer to
//! `POST {base}/webrtc/offer/{camera_id}` and receives the answer in the
//! response body. Both bodies use the browser's `RTCSessionDescriptionInit`
//! shape: `{"type": "offer", "sdp": "v=0..."}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use typeshare::typeshare;

use crate::error::{AppError, Result};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Pranswer => write!(f, "pranswer"),
            SdpType::Answer => write!(f, "answer"),
            SdpType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Session description as exchanged with the signaling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse a signaling response body, accepting only answers.
    ///
    /// A body with no recognizable `type` is a protocol error, not an empty
    /// answer.
    pub fn parse_answer(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| AppError::Negotiation(format!("Invalid answer from server: {}", e)))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::Negotiation("Invalid answer from server: missing type".to_string())
            })?;

        let sdp_type = match kind {
            "answer" => SdpType::Answer,
            "pranswer" => SdpType::Pranswer,
            other => {
                return Err(AppError::Negotiation(format!(
                    "Invalid answer from server: unexpected type '{}'",
                    other
                )))
            }
        };

        let sdp = value
            .get("sdp")
            .and_then(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                AppError::Negotiation("Invalid answer from server: missing sdp".to_string())
            })?;

        Ok(Self {
            sdp_type,
            sdp: sdp.to_string(),
        })
    }
}

/// Media connectivity state, as reported by the ICE agent
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Media is flowing.
    pub fn is_up(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Completed)
    }

    /// The session has lost connectivity and should be renegotiated.
    pub fn is_broken(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Checking => write!(f, "checking"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Completed => write!(f, "completed"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Relays a local offer to the remote peer and returns its answer
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange_offer(
        &self,
        camera_id: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription>;
}

/// HTTP signaling against the detector backend
pub struct HttpSignaling {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignaling {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn offer_url(&self, camera_id: &str) -> String {
        format!(
            "{}/webrtc/offer/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(camera_id)
        )
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange_offer(
        &self,
        camera_id: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        let url = self.offer_url(camera_id);
        debug!("Posting offer for camera {} to {}", camera_id, url);

        let resp = self.client.post(&url).json(offer).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("signaling request to {}", url))
            } else {
                AppError::Http(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Negotiation(format!(
                "signaling server returned {}",
                status
            )));
        }

        let body = resp.text().await?;
        SessionDescription::parse_answer(&body)
    }
}
