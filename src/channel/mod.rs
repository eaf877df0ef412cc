//! Detector event channel
//!
//! One duplex text connection per camera carrying `polygon` and `hit`
//! messages inbound and `video_size` announcements outbound.

pub mod protocol;
pub mod supervisor;
pub mod transport;

pub use protocol::{ChannelReadyState, InboundMessage, OutboundMessage};
pub use supervisor::{ChannelOptions, ChannelSender, ChannelStatus, ChannelSupervisor};
pub use transport::{ChannelConnection, ChannelConnector, WsConnector};
