//! Smartbow viewer - dual camera archery viewer
//!
//! Streams a target camera and a shooter camera over WebRTC, keeps a
//! detector event channel open, and maps reported arrow hits from camera
//! pixels onto a fixed target face.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod geometry;
pub mod hit;
pub mod utils;
pub mod viewer;
pub mod webrtc;

pub use error::{AppError, Result};
