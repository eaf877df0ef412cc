use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Session stopped")]
    Stopped,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether a supervisor should schedule another attempt after this error.
    ///
    /// Configuration and geometry problems are refusals, not transient
    /// faults, so retrying them would only loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Config(_) | AppError::DegenerateGeometry(_) | AppError::Stopped
        )
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
