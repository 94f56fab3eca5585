use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::debug;
use wellcam_common::config::CameraConfig;
use wellcam_common::frame::{Frame, PixelFormat};

use super::{CameraDriver, CaptureError};

/// Synthetic sensor producing a scrolling colour gradient.
///
/// Buffers handed back through `give_back` are reused for later frames, so a
/// steady stream allocates nothing once the pool has warmed up.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    format: PixelFormat,
    sensor_quality: u8,
    interval: Duration,
    next_due: Option<Instant>,
    free_buffers: Vec<Vec<u8>>,
    scratch: Vec<u8>,
    seq: u64,
}

impl TestPatternCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            format: config.pixel_format,
            sensor_quality: config.sensor_quality,
            interval: Duration::from_secs_f64(1.0 / config.fps),
            next_due: None,
            free_buffers: Vec::with_capacity(config.frame_buffers),
            scratch: Vec::new(),
            seq: 0,
        }
    }

    fn wait_for_exposure(&mut self) {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
    }

    fn render_rgb(&self, out: &mut Vec<u8>) {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = (self.seq * 4) as usize;
        out.clear();
        out.reserve(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                out.push(((x + shift) * 255 / w.max(1)) as u8);
                out.push((y * 255 / h.max(1)) as u8);
                out.push(((x + y + shift) % 256) as u8);
            }
        }
    }

    fn render(&self, rgb: &[u8], out: &mut Vec<u8>) -> Result<(), CaptureError> {
        out.clear();
        match self.format {
            PixelFormat::Rgb888 => out.extend_from_slice(rgb),
            PixelFormat::Rgb565 => {
                for px in rgb.chunks_exact(3) {
                    let v = ((px[0] as u16 >> 3) << 11) | ((px[1] as u16 >> 2) << 5) | (px[2] as u16 >> 3);
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            PixelFormat::Grayscale => {
                out.extend(rgb.chunks_exact(3).map(luma));
            }
            PixelFormat::Yuv422 => {
                for pair in rgb.chunks(6) {
                    let (a, b) = if pair.len() == 6 {
                        (&pair[..3], &pair[3..])
                    } else {
                        (pair, pair)
                    };
                    let (u, v) = chroma(a);
                    out.extend_from_slice(&[luma(a), u, luma(b), v]);
                }
            }
            PixelFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut *out, self.sensor_quality)
                    .encode(rgb, self.width, self.height, ExtendedColorType::Rgb8)
                    .map_err(|e| CaptureError::Driver(format!("on-sensor JPEG failed: {e}")))?;
            }
        }
        Ok(())
    }
}

impl CameraDriver for TestPatternCamera {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        self.wait_for_exposure();

        let mut rgb = std::mem::take(&mut self.scratch);
        self.render_rgb(&mut rgb);

        let mut data = self.free_buffers.pop().unwrap_or_default();
        let rendered = self.render(&rgb, &mut data);
        self.scratch = rgb;
        if let Err(e) = rendered {
            self.free_buffers.push(data);
            return Err(e);
        }

        let frame = Frame::new(data, self.width, self.height, self.format, self.seq);
        self.seq += 1;
        Ok(frame)
    }

    fn give_back(&mut self, frame: Frame) {
        debug!(seq = frame.seq, "test pattern buffer returned");
        self.free_buffers.push(frame.data);
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

fn luma(px: &[u8]) -> u8 {
    let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
    y.round().clamp(0.0, 255.0) as u8
}

fn chroma(px: &[u8]) -> (u8, u8) {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    let u = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;
    (
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(format: PixelFormat) -> CameraConfig {
        CameraConfig {
            width: 16,
            height: 8,
            pixel_format: format,
            fps: 1000.0,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn uncompressed_frames_match_geometry() {
        for format in [
            PixelFormat::Rgb888,
            PixelFormat::Rgb565,
            PixelFormat::Grayscale,
            PixelFormat::Yuv422,
        ] {
            let mut camera = TestPatternCamera::new(&config(format));
            let frame = camera.capture().unwrap();
            assert_eq!(frame.format, format);
            assert!(frame.check_geometry().is_ok(), "{format:?} frame has wrong length");
        }
    }

    #[test]
    fn jpeg_frames_carry_soi_marker() {
        let mut camera = TestPatternCamera::new(&config(PixelFormat::Jpeg));
        let frame = camera.capture().unwrap();
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut camera = TestPatternCamera::new(&config(PixelFormat::Grayscale));
        let a = camera.capture().unwrap();
        let b = camera.capture().unwrap();
        assert_eq!((a.seq, b.seq), (0, 1));
    }

    #[test]
    fn returned_buffers_are_reused() {
        let mut camera = TestPatternCamera::new(&config(PixelFormat::Rgb565));
        let frame = camera.capture().unwrap();
        let ptr = frame.data.as_ptr();
        camera.give_back(frame);
        let again = camera.capture().unwrap();
        assert_eq!(again.data.as_ptr(), ptr);
    }
}
