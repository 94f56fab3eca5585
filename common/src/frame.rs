use serde::Deserialize;

/// Pixel layout of a frame as delivered by the camera driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Already compressed by the sensor.
    Jpeg,
    /// 3 bytes per pixel, R G B.
    Rgb888,
    /// 2 bytes per pixel, big-endian `RRRRRGGG GGGBBBBB`.
    Rgb565,
    /// 1 byte per pixel luma.
    Grayscale,
    /// Packed YUYV, 2 bytes per pixel.
    Yuv422,
}

impl PixelFormat {
    pub fn is_jpeg(self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }

    /// Bytes per pixel for uncompressed formats, `None` for JPEG.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Grayscale => Some(1),
        }
    }

    /// Expected buffer length for a `width` x `height` frame, `None` for JPEG
    /// or when the size overflows.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let bpp = self.bytes_per_pixel()?;
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(bpp)
    }
}

/// A frame checked out of the camera driver's buffer pool.
///
/// Ownership of the buffer always goes back through the frame source that
/// produced it; dropping a `Frame` instead of releasing it shrinks the pool.
#[derive(Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub seq: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, seq: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            seq,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks that an uncompressed frame's buffer matches its geometry.
    ///
    /// YUYV packs two pixels per macropixel, so its width must be even.
    pub fn check_geometry(&self) -> Result<(), FrameError> {
        if self.format == PixelFormat::Yuv422 && self.width % 2 != 0 {
            return Err(FrameError::OddYuyvWidth(self.width));
        }
        let Some(expected) = self.format.frame_len(self.width, self.height) else {
            return Ok(());
        };
        if self.data.len() != expected {
            return Err(FrameError::LengthMismatch {
                format: self.format,
                width: self.width,
                height: self.height,
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{format:?} frame {width}x{height} should be {expected} bytes, got {got}")]
    LengthMismatch {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("Yuv422 frame width {0} is not even")]
    OddYuyvWidth(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb565_geometry() {
        assert_eq!(PixelFormat::Rgb565.frame_len(4, 2), Some(16));
        let frame = Frame::new(vec![0; 16], 4, 2, PixelFormat::Rgb565, 0);
        assert!(frame.check_geometry().is_ok());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let frame = Frame::new(vec![0; 10], 4, 2, PixelFormat::Rgb888, 3);
        let err = frame.check_geometry().unwrap_err();
        assert!(err.to_string().contains("should be 24 bytes, got 10"));
    }

    #[test]
    fn yuyv_needs_even_width() {
        let frame = Frame::new(vec![0x80; 18], 3, 3, PixelFormat::Yuv422, 0);
        assert!(matches!(frame.check_geometry(), Err(FrameError::OddYuyvWidth(3))));

        let frame = Frame::new(vec![0x80; 24], 4, 3, PixelFormat::Yuv422, 0);
        assert!(frame.check_geometry().is_ok());
    }

    #[test]
    fn jpeg_has_no_fixed_length() {
        assert_eq!(PixelFormat::Jpeg.frame_len(640, 480), None);
        let frame = Frame::new(vec![0xFF, 0xD8], 640, 480, PixelFormat::Jpeg, 1);
        assert!(frame.check_geometry().is_ok());
        assert!(frame.format.is_jpeg());
    }

    #[test]
    fn overflowing_geometry_has_no_length() {
        assert_eq!(PixelFormat::Rgb888.frame_len(u32::MAX, u32::MAX), None);
    }
}
