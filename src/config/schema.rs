use serde::{Deserialize, Serialize};
use std::time::Duration;
use typeshare::typeshare;

use crate::channel::ChannelOptions;
use crate::webrtc::{ReconnectOptions, RtcConfig, TurnServer};

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Video session settings
    pub media: MediaConfig,
    /// Detector event channel settings
    pub channel: ChannelConfig,
    /// Overlay geometry and hit display
    pub overlay: OverlayConfig,
    /// Camera identifiers
    pub cameras: CamerasConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            channel: ChannelConfig::default(),
            overlay: OverlayConfig::default(),
            cameras: CamerasConfig::default(),
        }
    }
}

/// Video session configuration
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// HTTP base for `webrtc/offer/{camera}`
    pub signaling_url: String,
    /// STUN server URLs, tried in order
    pub stun_servers: Vec<String>,
    /// TURN relays with credentials
    pub turn_servers: Vec<TurnServer>,
    pub ice_candidate_pool_size: u8,
    /// Offer/answer exchange timeout
    pub offer_timeout_ms: u32,
    /// Give up after this many consecutive failures (unset = never)
    pub max_attempts: Option<u32>,
    /// Linear backoff step
    pub base_delay_ms: u32,
    /// Backoff ceiling
    pub max_delay_ms: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let rtc = RtcConfig::default();
        Self {
            signaling_url: "http://127.0.0.1:8000/".to_string(),
            stun_servers: rtc.stun_servers,
            turn_servers: rtc.turn_servers,
            ice_candidate_pool_size: rtc.ice_candidate_pool_size,
            offer_timeout_ms: 10_000,
            max_attempts: None,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl MediaConfig {
    pub fn rtc_config(&self) -> RtcConfig {
        RtcConfig {
            stun_servers: self.stun_servers.clone(),
            turn_servers: self.turn_servers.clone(),
            ice_candidate_pool_size: self.ice_candidate_pool_size,
        }
    }

    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms as u64),
            max_delay: Duration::from_millis(self.max_delay_ms as u64),
        }
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms as u64)
    }
}

/// Event channel configuration
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Duplex endpoint base, `hit/{camera}` is appended
    pub base_url: String,
    pub initial_delay_ms: u32,
    pub max_delay_ms: u32,
    /// Exponent cap for the doubling backoff
    pub max_exponent: u32,
    /// Open handshake timeout
    pub connect_timeout_ms: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let options = ChannelOptions::default();
        Self {
            base_url: options.base_url,
            initial_delay_ms: options.initial_delay.as_millis() as u32,
            max_delay_ms: options.max_delay.as_millis() as u32,
            max_exponent: options.max_exponent,
            connect_timeout_ms: options.connect_timeout.as_millis() as u32,
        }
    }
}

impl ChannelConfig {
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            base_url: self.base_url.clone(),
            initial_delay: Duration::from_millis(self.initial_delay_ms as u64),
            max_delay: Duration::from_millis(self.max_delay_ms as u64),
            max_exponent: self.max_exponent,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms as u64),
        }
    }
}

/// Overlay configuration
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Target rectangle size relative to the largest 3:4 fit
    pub projection_scale: f64,
    /// Grid overlay scale around the polygon centroid
    pub grid_scale: f64,
    /// How long a hit stays on screen
    pub hit_display_ms: u32,
    /// Hit history length
    pub hit_log_capacity: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            projection_scale: 0.6,
            grid_scale: 1.3,
            hit_display_ms: crate::hit::HIT_DISPLAY_DURATION.as_millis() as u32,
            hit_log_capacity: crate::hit::HIT_LOG_CAPACITY as u32,
        }
    }
}

impl OverlayConfig {
    pub fn hit_display_duration(&self) -> Duration {
        Duration::from_millis(self.hit_display_ms as u64)
    }
}

/// Camera identifiers
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamerasConfig {
    /// Target camera; also scopes the event channel
    pub target: String,
    /// Camera facing the shooter
    pub shooter: String,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            target: "target1".to_string(),
            shooter: "shooter1".to_string(),
        }
    }
}
