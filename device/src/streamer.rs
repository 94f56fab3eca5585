use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::camera::{CaptureError, FrameSource};
use crate::encoder::{EncodeError, EncodedChunk, StreamEncoder};

/// The receiving end of a stream went away.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("stream client disconnected")]
pub struct SinkClosed;

/// Ordered byte sink for one streaming connection.
///
/// A write either hands all of `data` to the transport or fails; a failure
/// means the connection is gone and nothing more will be accepted.
pub trait ChunkSink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), SinkClosed>;
}

/// Feeds an HTTP response body through a bounded channel.
///
/// The body stream owns the receiver; when the client disconnects the body is
/// dropped and every later write fails.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for ChannelSink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), SinkClosed> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(data))
            .map_err(|_| SinkClosed)
    }
}

/// Why a streaming session stopped.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Disconnected(#[from] SinkClosed),
}

#[derive(Debug)]
pub struct SessionSummary {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub ended_by: StreamError,
}

/// Drives the `multipart/x-mixed-replace` protocol for one connection at a time.
///
/// Each part goes out as header, payload, then the boundary delimiter. The
/// loop has no exit other than a capture, encode or write failure.
pub struct MultipartStreamer {
    source: Arc<FrameSource>,
    encoder: StreamEncoder,
    boundary: String,
    delimiter: Vec<u8>,
}

impl MultipartStreamer {
    pub fn new(source: Arc<FrameSource>, encoder: StreamEncoder, boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        let delimiter = format!("\r\n--{boundary}\r\n").into_bytes();
        Self {
            source,
            encoder,
            boundary,
            delimiter,
        }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace;boundary={}", self.boundary)
    }

    pub fn source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    /// Streams frames into `sink` until something fails. Blocks the calling
    /// thread for the whole session.
    pub fn run<S: ChunkSink>(&self, sink: &mut S) -> SessionSummary {
        let mut frames_sent = 0u64;
        let mut bytes_sent = 0u64;

        let ended_by = loop {
            let chunk = match self.next_chunk() {
                Ok(chunk) => chunk,
                Err(e) => break e,
            };

            let len = chunk.len();
            let sent = self.send_part(sink, &chunk);
            chunk.release(&self.source);

            if let Err(e) = sent {
                break StreamError::Disconnected(e);
            }
            frames_sent += 1;
            bytes_sent += len as u64;
        };

        match &ended_by {
            StreamError::Disconnected(_) => {
                info!(frames_sent, bytes_sent, "stream client disconnected")
            }
            e => warn!(frames_sent, bytes_sent, error = %e, "stream aborted"),
        }

        SessionSummary {
            frames_sent,
            bytes_sent,
            ended_by,
        }
    }

    fn next_chunk(&self) -> Result<EncodedChunk, StreamError> {
        let frame = self.source.acquire()?;
        Ok(self.encoder.encode(frame, &self.source)?)
    }

    fn send_part<S: ChunkSink>(&self, sink: &mut S, chunk: &EncodedChunk) -> Result<(), SinkClosed> {
        let payload = chunk.as_bytes();
        sink.write_chunk(part_header(payload.len()).as_bytes())?;
        sink.write_chunk(payload)?;
        sink.write_chunk(&self.delimiter)?;
        debug!(bytes = payload.len(), origin = ?chunk.origin(), "part sent");
        Ok(())
    }
}

fn part_header(len: usize) -> String {
    format!("Content-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n")
}
