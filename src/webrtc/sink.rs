//! Display sinks for inbound video
//!
//! A sink is bound to at most one inbound stream at a time. The supervisor
//! owns its sink exclusively and always unbinds before binding a new stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::rtp::packet::Packet;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};

/// Where an inbound stream's media comes from
#[derive(Clone)]
pub enum StreamSource {
    /// Remote track of a live peer connection
    Rtc(Arc<TrackRemote>),
    /// Stream announced without any readable media
    Detached,
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSource::Rtc(_) => write!(f, "Rtc"),
            StreamSource::Detached => write!(f, "Detached"),
        }
    }
}

/// Inbound media stream handed to a sink
#[derive(Debug, Clone)]
pub struct InboundStream {
    pub stream_id: String,
    pub track_id: String,
    pub source: StreamSource,
}

impl InboundStream {
    pub fn from_track(track: Arc<TrackRemote>) -> Self {
        Self {
            stream_id: track.stream_id(),
            track_id: track.id(),
            source: StreamSource::Rtc(track),
        }
    }
}

/// A display target that can bind, play and release one stream
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Attach a stream, replacing whatever was bound.
    fn bind(&mut self, stream: InboundStream);

    /// Release the bound stream, if any. Idempotent.
    fn unbind(&mut self);

    /// Start consuming the bound stream.
    async fn play(&mut self) -> Result<()>;

    fn is_bound(&self) -> bool;
}

/// One reassembled video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RTP timestamp shared by every packet of the frame
    pub timestamp: u32,
    /// Concatenated RTP payloads
    pub data: Bytes,
    /// Frame number since the sink started playing
    pub sequence: u64,
}

/// Sink counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub packets: u64,
    pub frames: u64,
    pub bytes: u64,
    /// Partial frames discarded because their marker packet never arrived
    pub dropped_frames: u64,
}

#[derive(Default)]
struct SinkCounters {
    packets: AtomicU64,
    frames: AtomicU64,
    bytes: AtomicU64,
    dropped_frames: AtomicU64,
}

impl SinkCounters {
    fn snapshot(&self) -> SinkStats {
        SinkStats {
            packets: self.packets.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
        }
    }
}

/// Groups RTP payloads into frames on the marker bit.
#[derive(Default)]
struct FrameAssembler {
    buf: BytesMut,
    timestamp: Option<u32>,
    next_sequence: u64,
}

enum Assembled {
    Pending,
    Frame(VideoFrame),
    /// A new timestamp started before the previous frame was marked complete
    Dropped,
}

impl FrameAssembler {
    fn push(&mut self, packet: &Packet) -> Assembled {
        let mut dropped = false;
        if let Some(ts) = self.timestamp {
            if ts != packet.header.timestamp && !self.buf.is_empty() {
                self.buf.clear();
                dropped = true;
            }
        }

        self.timestamp = Some(packet.header.timestamp);
        self.buf.extend_from_slice(&packet.payload);

        if packet.header.marker {
            let frame = VideoFrame {
                timestamp: packet.header.timestamp,
                data: self.buf.split().freeze(),
                sequence: self.next_sequence,
            };
            self.next_sequence += 1;
            self.timestamp = None;
            return Assembled::Frame(frame);
        }

        if dropped {
            Assembled::Dropped
        } else {
            Assembled::Pending
        }
    }
}

/// Headless sink: reads RTP from the bound track and publishes frames.
pub struct RtpFrameSink {
    label: String,
    bound: Option<InboundStream>,
    reader: Option<JoinHandle<()>>,
    frame_tx: broadcast::Sender<VideoFrame>,
    counters: Arc<SinkCounters>,
}

impl RtpFrameSink {
    pub fn new(label: impl Into<String>) -> Self {
        let (frame_tx, _) = broadcast::channel(16);
        Self {
            label: label.into(),
            bound: None,
            reader: None,
            frame_tx,
            counters: Arc::new(SinkCounters::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoFrame> {
        self.frame_tx.subscribe()
    }

    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }

    /// Shared handle on the counters, readable after the sink is moved into
    /// a supervisor.
    pub fn stats_handle(&self) -> SinkStatsHandle {
        SinkStatsHandle(self.counters.clone())
    }

    pub fn is_playing(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    async fn read_loop(
        label: String,
        track: Arc<TrackRemote>,
        frame_tx: broadcast::Sender<VideoFrame>,
        counters: Arc<SinkCounters>,
    ) {
        let mut assembler = FrameAssembler::default();
        loop {
            let packet = match track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    debug!("{} track {} ended: {}", label, track.id(), e);
                    break;
                }
            };

            counters.packets.fetch_add(1, Ordering::Relaxed);
            counters
                .bytes
                .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

            match assembler.push(&packet) {
                Assembled::Frame(frame) => {
                    counters.frames.fetch_add(1, Ordering::Relaxed);
                    // No subscribers is fine
                    let _ = frame_tx.send(frame);
                }
                Assembled::Dropped => {
                    counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                }
                Assembled::Pending => {}
            }
        }
    }
}

#[async_trait]
impl VideoSink for RtpFrameSink {
    fn bind(&mut self, stream: InboundStream) {
        self.stop_reader();
        debug!(
            "{} sink bound to stream {} (track {})",
            self.label, stream.stream_id, stream.track_id
        );
        self.bound = Some(stream);
    }

    fn unbind(&mut self) {
        self.stop_reader();
        if let Some(stream) = self.bound.take() {
            debug!("{} sink released stream {}", self.label, stream.stream_id);
        }
    }

    async fn play(&mut self) -> Result<()> {
        let stream = self
            .bound
            .as_ref()
            .ok_or_else(|| AppError::Playback("no stream bound".to_string()))?;

        let track = match &stream.source {
            StreamSource::Rtc(track) => track.clone(),
            StreamSource::Detached => {
                return Err(AppError::Playback(format!(
                    "stream {} has no media source",
                    stream.stream_id
                )))
            }
        };

        if self.is_playing() {
            return Ok(());
        }

        info!("{} sink playing {} track {}", self.label, track.kind(), track.id());
        self.reader = Some(tokio::spawn(Self::read_loop(
            self.label.clone(),
            track,
            self.frame_tx.clone(),
            self.counters.clone(),
        )));
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

impl Drop for RtpFrameSink {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Read-only view of a sink's counters
#[derive(Clone)]
pub struct SinkStatsHandle(Arc<SinkCounters>);

impl SinkStatsHandle {
    pub fn snapshot(&self) -> SinkStats {
        self.0.snapshot()
    }
}
