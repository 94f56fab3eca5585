use std::borrow::Cow;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, warn};
use wellcam_common::frame::{Frame, FrameError, PixelFormat};

use crate::camera::FrameSource;

/// Where the bytes of an [`EncodedChunk`] live, which decides how they are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrigin {
    CameraOwned,
    HeapOwned,
}

/// A JPEG image ready to go on the wire.
///
/// `CameraOwned` still holds the driver's frame buffer; `HeapOwned` holds a
/// buffer produced by compression. Either way the chunk must be consumed by
/// [`EncodedChunk::release`] once it has been sent.
#[derive(Debug)]
pub enum EncodedChunk {
    CameraOwned(Frame),
    HeapOwned(Vec<u8>),
}

impl EncodedChunk {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedChunk::CameraOwned(frame) => &frame.data,
            EncodedChunk::HeapOwned(buf) => buf,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn origin(&self) -> ChunkOrigin {
        match self {
            EncodedChunk::CameraOwned(_) => ChunkOrigin::CameraOwned,
            EncodedChunk::HeapOwned(_) => ChunkOrigin::HeapOwned,
        }
    }

    /// Returns camera buffers to the frame source and frees heap buffers.
    pub fn release(self, source: &FrameSource) {
        match self {
            EncodedChunk::CameraOwned(frame) => source.release(frame),
            EncodedChunk::HeapOwned(buf) => drop(buf),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
    #[error("converted {format:?} frame is {got} pixel bytes, expected {expected}")]
    ConvertedLength {
        format: PixelFormat,
        expected: usize,
        got: usize,
    },
    #[error("JPEG compression failed: {0}")]
    Compression(#[from] image::ImageError),
}

/// Turns any frame coming out of the camera into a JPEG chunk.
#[derive(Debug, Clone, Copy)]
pub struct StreamEncoder {
    quality: u8,
}

impl StreamEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// JPEG frames pass through untouched. Anything else is compressed into a
    /// new buffer and the source frame goes back to `source` straight away,
    /// whether compression worked or not.
    pub fn encode(&self, frame: Frame, source: &FrameSource) -> Result<EncodedChunk, EncodeError> {
        if frame.format.is_jpeg() {
            return Ok(EncodedChunk::CameraOwned(frame));
        }

        let seq = frame.seq;
        let result = self.compress(&frame);
        source.release(frame);

        match result {
            Ok(jpeg) => {
                debug!(seq, bytes = jpeg.len(), quality = self.quality, "frame compressed");
                Ok(EncodedChunk::HeapOwned(jpeg))
            }
            Err(e) => {
                warn!(seq, error = %e, "JPEG compression failed");
                Err(e)
            }
        }
    }

    fn compress(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        frame.check_geometry()?;

        let (pixels, color) = match frame.format {
            PixelFormat::Grayscale => (Cow::Borrowed(frame.data.as_slice()), ExtendedColorType::L8),
            PixelFormat::Rgb888 => (Cow::Borrowed(frame.data.as_slice()), ExtendedColorType::Rgb8),
            PixelFormat::Rgb565 => (Cow::Owned(rgb565_to_rgb(&frame.data)), ExtendedColorType::Rgb8),
            PixelFormat::Yuv422 => (Cow::Owned(yuyv_to_rgb(&frame.data)), ExtendedColorType::Rgb8),
            PixelFormat::Jpeg => unreachable!("JPEG frames are never compressed"),
        };

        // The JPEG encoder asserts on buffer length rather than returning an error.
        let expected =
            (frame.width as usize) * (frame.height as usize) * usize::from(color.channel_count());
        if pixels.len() != expected {
            return Err(EncodeError::ConvertedLength {
                format: frame.format,
                expected,
                got: pixels.len(),
            });
        }

        let mut out = Vec::with_capacity(pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &pixels,
            frame.width,
            frame.height,
            color,
        )?;
        Ok(out)
    }
}

fn rgb565_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1F) as u8;
        let g = ((v >> 5) & 0x3F) as u8;
        let b = (v & 0x1F) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for quad in data.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402 * v));
            rgb.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_to_u8(y + 1.772 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
