pub mod jpeg_dir;
pub mod test_pattern;

use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::{debug, warn};
use wellcam_common::config::{CameraConfig, CameraSourceKind};
use wellcam_common::frame::Frame;

pub use jpeg_dir::JpegDirCamera;
pub use test_pattern::TestPatternCamera;

/// Hardware-facing half of the camera.
///
/// `capture` blocks until the sensor has a frame ready. Every frame it
/// returns must eventually come back through `give_back`, which hands the
/// buffer to the driver for reuse.
pub trait CameraDriver: Send {
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    fn give_back(&mut self, frame: Frame);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera driver failed: {0}")]
    Driver(String),
    #[error("camera returned no frame")]
    NoFrame,
    #[error("frame source lock poisoned")]
    Poisoned,
}

/// Shared access point to the single camera.
///
/// All driver calls are serialized behind one mutex, and no more than
/// `pool_size` frames are checked out at once: `acquire` parks the caller
/// until a frame buffer comes back.
pub struct FrameSource {
    driver: Mutex<Box<dyn CameraDriver>>,
    in_flight: Mutex<usize>,
    returned: Condvar,
    pool_size: usize,
}

impl FrameSource {
    pub fn new(driver: Box<dyn CameraDriver>, pool_size: usize) -> Self {
        Self {
            driver: Mutex::new(driver),
            in_flight: Mutex::new(0),
            returned: Condvar::new(),
            pool_size: pool_size.max(1),
        }
    }

    /// Blocks until a frame is available or the driver fails.
    pub fn acquire(&self) -> Result<Frame, CaptureError> {
        {
            let mut in_flight = self.lock_in_flight()?;
            while *in_flight >= self.pool_size {
                in_flight = self
                    .returned
                    .wait(in_flight)
                    .map_err(|_| CaptureError::Poisoned)?;
            }
            *in_flight += 1;
        }

        let result = self.lock_driver().and_then(|mut driver| driver.capture());
        match result {
            Ok(frame) => {
                debug!(seq = frame.seq, bytes = frame.len(), format = ?frame.format, "frame acquired");
                Ok(frame)
            }
            Err(e) => {
                self.return_slot();
                Err(e)
            }
        }
    }

    /// Hands a camera-owned frame back to the driver.
    pub fn release(&self, frame: Frame) {
        let seq = frame.seq;
        match self.lock_driver() {
            Ok(mut driver) => driver.give_back(frame),
            Err(e) => warn!(seq, error = %e, "could not return frame to driver"),
        }
        self.return_slot();
        debug!(seq, "frame released");
    }

    /// Number of frames currently checked out.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|n| *n).unwrap_or(self.pool_size)
    }

    fn return_slot(&self) {
        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                *in_flight = in_flight.saturating_sub(1);
                self.returned.notify_one();
            }
            Err(_) => warn!("frame pool counter poisoned"),
        }
    }

    fn lock_in_flight(&self) -> Result<MutexGuard<'_, usize>, CaptureError> {
        self.in_flight.lock().map_err(|_| CaptureError::Poisoned)
    }

    fn lock_driver(&self) -> Result<MutexGuard<'_, Box<dyn CameraDriver>>, CaptureError> {
        self.driver.lock().map_err(|_| CaptureError::Poisoned)
    }
}

/// Builds the driver selected in the camera config.
pub fn open_driver(config: &CameraConfig) -> Result<Box<dyn CameraDriver>, CaptureError> {
    match config.source {
        CameraSourceKind::TestPattern => Ok(Box::new(TestPatternCamera::new(config))),
        CameraSourceKind::JpegDir => {
            let dir = config
                .jpeg_dir
                .as_deref()
                .ok_or_else(|| CaptureError::Driver("camera.jpeg_dir is not set".into()))?;
            Ok(Box::new(JpegDirCamera::open(dir.as_ref(), config.fps)?))
        }
    }
}
