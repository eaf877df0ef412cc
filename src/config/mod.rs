//! Persistent viewer configuration

mod schema;
mod store;

pub use schema::{AppConfig, CamerasConfig, ChannelConfig, MediaConfig, OverlayConfig};
pub use store::{ConfigChange, ConfigStore};
