//! WebRTC configuration

use serde::{Deserialize, Serialize};
use typeshare::typeshare;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Public ICE servers used when nothing else is configured
pub mod public_ice {
    pub const GOOGLE_STUN: &str = "stun:stun.l.google.com:19302";
    pub const CLOUDFLARE_STUN: &str = "stun:stun.cloudflare.com:3478";

    pub fn stun_servers() -> Vec<String> {
        vec![GOOGLE_STUN.to_string(), CLOUDFLARE_STUN.to_string()]
    }
}

/// Default ICE candidate pool size
pub const DEFAULT_ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Settings for one receive-only peer connection
#[derive(Debug, Clone, PartialEq)]
pub struct RtcConfig {
    /// STUN server URLs, tried in order
    pub stun_servers: Vec<String>,
    /// TURN relays
    pub turn_servers: Vec<TurnServer>,
    /// Number of ICE candidates gathered ahead of the offer
    pub ice_candidate_pool_size: u8,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: public_ice::stun_servers(),
            turn_servers: vec![],
            ice_candidate_pool_size: DEFAULT_ICE_CANDIDATE_POOL_SIZE,
        }
    }
}

impl RtcConfig {
    /// Ordered ICE server list, STUN first then TURN.
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut servers: Vec<RTCIceServer> = self
            .stun_servers
            .iter()
            .filter(|url| !url.trim().is_empty())
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        servers.extend(
            self.turn_servers
                .iter()
                .filter(|turn| !turn.urls.is_empty())
                .map(|turn| RTCIceServer {
                    urls: turn.urls.clone(),
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }),
        );

        servers
    }

    pub fn has_turn(&self) -> bool {
        self.turn_servers.iter().any(|t| !t.urls.is_empty())
    }
}

/// TURN server configuration
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp", "turn:turn.example.com:3478?transport=tcp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }

    /// One relay reachable over both UDP and TCP on `host:port`.
    pub fn udp_and_tcp(host_port: &str, username: String, credential: String) -> Self {
        Self {
            urls: vec![
                format!("turn:{}?transport=udp", host_port),
                format!("turn:{}?transport=tcp", host_port),
            ],
            username,
            credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ice_servers() {
        let config = RtcConfig::default();
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec![public_ice::GOOGLE_STUN.to_string()]);
        assert_eq!(servers[1].urls, vec![public_ice::CLOUDFLARE_STUN.to_string()]);
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert!(!config.has_turn());
    }

    #[test]
    fn test_turn_relay_follows_stun() {
        let config = RtcConfig {
            stun_servers: vec!["stun:a:3478".into(), " ".into()],
            turn_servers: vec![TurnServer::udp_and_tcp(
                "relay.example.com:3478",
                "user".into(),
                "secret".into(),
            )],
            ..Default::default()
        };

        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[1].urls,
            vec![
                "turn:relay.example.com:3478?transport=udp".to_string(),
                "turn:relay.example.com:3478?transport=tcp".to_string(),
            ]
        );
        assert_eq!(servers[1].username, "user");
        assert!(config.has_turn());
    }
}
