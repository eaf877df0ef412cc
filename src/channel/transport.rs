//! Duplex text transport for the hit channel

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{AppError, Result};

/// Outgoing half: accepts serialized text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;

/// Incoming half: text frames until the peer closes. An `Err` item is a
/// transport failure and is treated like a close.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open duplex connection
pub struct ChannelConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens a duplex connection to a URL
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<ChannelConnection>;
}

/// WebSocket connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<ChannelConnection> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| AppError::Channel(format!("connect to {} failed: {}", url, e)))?;
        debug!("WebSocket {} upgraded ({})", url, response.status());

        let (write, read) = ws.split();

        let sink = write
            .with(|text: String| future::ready(Ok(Message::Text(text))))
            .sink_map_err(|e: tokio_tungstenite::tungstenite::Error| {
                AppError::Channel(format!("send failed: {}", e))
            });

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                // Control and binary frames carry nothing for us
                Ok(_) => None,
                Err(e) => Some(Err(AppError::Channel(format!("receive failed: {}", e)))),
            })
        });

        Ok(ChannelConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
