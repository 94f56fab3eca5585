use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use wellcam_common::frame::{Frame, PixelFormat};

use super::{CameraDriver, CaptureError};

/// Replays JPEG files from a directory in name order, looping forever.
///
/// Frames are reported as `Jpeg`, so they travel through the streamer
/// without re-encoding.
pub struct JpegDirCamera {
    images: Vec<(PathBuf, Vec<u8>)>,
    next: usize,
    interval: Duration,
    next_due: Option<Instant>,
    seq: u64,
}

impl JpegDirCamera {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, CaptureError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CaptureError::Driver(format!("cannot read {}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::read(&path) {
                Ok(bytes) if bytes.starts_with(&[0xFF, 0xD8]) => images.push((path, bytes)),
                Ok(_) => warn!(path = %path.display(), "skipping file without JPEG header"),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }

        if images.is_empty() {
            return Err(CaptureError::Driver(format!(
                "no JPEG images found in {}",
                dir.display()
            )));
        }

        info!(dir = %dir.display(), images = images.len(), "jpeg-dir camera ready");

        Ok(Self {
            images,
            next: 0,
            interval: Duration::from_secs_f64(1.0 / fps),
            next_due: None,
            seq: 0,
        })
    }
}

impl CameraDriver for JpegDirCamera {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);

        let (_, bytes) = &self.images[self.next];
        self.next = (self.next + 1) % self.images.len();

        let frame = Frame::new(bytes.clone(), 0, 0, PixelFormat::Jpeg, self.seq);
        self.seq += 1;
        Ok(frame)
    }

    fn give_back(&mut self, _frame: Frame) {}

    fn name(&self) -> &str {
        "jpeg-dir"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), [0xFF, 0xD8, 0x02]).unwrap();
        std::fs::write(dir.path().join("a.JPEG"), [0xFF, 0xD8, 0x01]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut camera = JpegDirCamera::open(dir.path(), 1000.0).unwrap();
        let first = camera.capture().unwrap();
        let second = camera.capture().unwrap();
        let third = camera.capture().unwrap();

        assert_eq!(first.data, vec![0xFF, 0xD8, 0x01]);
        assert_eq!(second.data, vec![0xFF, 0xD8, 0x02]);
        assert_eq!(third.data, first.data);
        assert_eq!(third.seq, 2);
        assert!(third.format.is_jpeg());
    }

    #[test]
    fn files_without_soi_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();

        let err = JpegDirCamera::open(dir.path(), 10.0).err().unwrap();
        assert!(err.to_string().contains("no JPEG images"));
    }
}
