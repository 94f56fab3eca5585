use serde::Deserialize;
use std::path::Path;

use crate::frame::PixelFormat;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port of the control listener. The stream listener binds `control_port + 1`.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_boundary")]
    pub boundary: String,
    /// Quality used when a non-JPEG frame has to be compressed before sending.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Number of multipart pieces buffered between the capture worker and the socket.
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraSourceKind {
    TestPattern,
    JpegDir,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: CameraSourceKind,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Size of the driver's frame-buffer pool.
    #[serde(default = "default_frame_buffers")]
    pub frame_buffers: usize,
    /// Quality of on-sensor JPEG compression when `pixel_format = "jpeg"`.
    #[serde(default = "default_sensor_quality")]
    pub sensor_quality: u8,
    #[serde(default)]
    pub jpeg_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActuatorBackend {
    Simulated,
    Sysfs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_actuator_backend")]
    pub backend: ActuatorBackend,
    #[serde(default = "default_min_position")]
    pub min_position: u16,
    #[serde(default = "default_max_position")]
    pub max_position: u16,
    #[serde(default = "default_step")]
    pub step: u16,
    #[serde(default = "default_initial_position")]
    pub initial_position: u16,
    /// Delay after every servo write so the horn reaches its target.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_flash_gpio")]
    pub flash_gpio: u32,
    #[serde(default)]
    pub pwm_chip: u32,
    #[serde(default)]
    pub pwm_channel: u32,
    #[serde(default = "default_min_pulse_us")]
    pub min_pulse_us: u32,
    #[serde(default = "default_max_pulse_us")]
    pub max_pulse_us: u32,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            control_port: default_control_port(),
        }
    }
}

impl ServerConfig {
    /// The stream listener always sits one port above the control listener.
    pub fn stream_port(&self) -> Option<u16> {
        self.control_port.checked_add(1)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            boundary: default_boundary(),
            jpeg_quality: default_jpeg_quality(),
            channel_depth: default_channel_depth(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            width: default_width(),
            height: default_height(),
            pixel_format: default_pixel_format(),
            fps: default_fps(),
            frame_buffers: default_frame_buffers(),
            sensor_quality: default_sensor_quality(),
            jpeg_dir: None,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            backend: default_actuator_backend(),
            min_position: default_min_position(),
            max_position: default_max_position(),
            step: default_step(),
            initial_position: default_initial_position(),
            settle_ms: default_settle_ms(),
            flash_gpio: default_flash_gpio(),
            pwm_chip: 0,
            pwm_channel: 0,
            min_pulse_us: default_min_pulse_us(),
            max_pulse_us: default_max_pulse_us(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.stream_port().is_none() {
            return Err(ConfigError::Invalid(format!(
                "control_port {} leaves no room for the stream port",
                self.server.control_port
            )));
        }

        let boundary = &self.stream.boundary;
        if boundary.is_empty()
            || boundary.len() > 70
            || !boundary.bytes().all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=?".contains(&b))
        {
            return Err(ConfigError::Invalid(format!(
                "stream boundary {boundary:?} is not a valid multipart boundary"
            )));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "stream.jpeg_quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            )));
        }
        if self.stream.channel_depth == 0 {
            return Err(ConfigError::Invalid("stream.channel_depth must be at least 1".into()));
        }

        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera frame size {}x{} is empty",
                cam.width, cam.height
            )));
        }
        if cam.pixel_format == PixelFormat::Yuv422 && cam.width % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "yuv422 frames need an even width, got {}",
                cam.width
            )));
        }
        if cam.frame_buffers == 0 {
            return Err(ConfigError::Invalid("camera.frame_buffers must be at least 1".into()));
        }
        if cam.fps.is_nan() || cam.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!("camera.fps must be positive, got {}", cam.fps)));
        }
        if !(1..=100).contains(&cam.sensor_quality) {
            return Err(ConfigError::Invalid(format!(
                "camera.sensor_quality must be within 1..=100, got {}",
                cam.sensor_quality
            )));
        }
        if cam.source == CameraSourceKind::JpegDir && cam.jpeg_dir.is_none() {
            return Err(ConfigError::Invalid(
                "camera.source = \"jpeg-dir\" requires camera.jpeg_dir".into(),
            ));
        }

        let act = &self.actuator;
        if act.step == 0 {
            return Err(ConfigError::Invalid("actuator.step must be non-zero".into()));
        }
        if act.min_position > act.max_position || act.max_position > 180 {
            return Err(ConfigError::Invalid(format!(
                "servo range {}..={} is not within 0..=180",
                act.min_position, act.max_position
            )));
        }
        if !(act.min_position..=act.max_position).contains(&act.initial_position) {
            return Err(ConfigError::Invalid(format!(
                "initial servo position {} is outside {}..={}",
                act.initial_position, act.min_position, act.max_position
            )));
        }
        if act.min_pulse_us >= act.max_pulse_us {
            return Err(ConfigError::Invalid(format!(
                "servo pulse range {}..{}us is empty",
                act.min_pulse_us, act.max_pulse_us
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_control_port() -> u16 {
    80
}
fn default_boundary() -> String {
    "123456789000000000000987654321".into()
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_channel_depth() -> usize {
    4
}
fn default_camera_source() -> CameraSourceKind {
    CameraSourceKind::TestPattern
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Jpeg
}
fn default_fps() -> f64 {
    15.0
}
fn default_frame_buffers() -> usize {
    2
}
fn default_sensor_quality() -> u8 {
    90
}
fn default_actuator_backend() -> ActuatorBackend {
    ActuatorBackend::Simulated
}
fn default_min_position() -> u16 {
    10
}
fn default_max_position() -> u16 {
    170
}
fn default_step() -> u16 {
    10
}
fn default_initial_position() -> u16 {
    90
}
fn default_settle_ms() -> u64 {
    10
}
fn default_flash_gpio() -> u32 {
    4
}
fn default_min_pulse_us() -> u32 {
    1000
}
fn default_max_pulse_us() -> u32 {
    2000
}
fn default_sysfs_root() -> String {
    "/sys/class".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.control_port, 80);
        assert_eq!(config.server.stream_port(), Some(81));
        assert_eq!(config.stream.boundary, "123456789000000000000987654321");
        assert_eq!(config.stream.jpeg_quality, 80);
        assert_eq!(config.actuator.initial_position, 90);
        assert_eq!(config.actuator.min_position, 10);
        assert_eq!(config.actuator.max_position, 170);
        assert_eq!(config.actuator.step, 10);
        assert_eq!(config.camera.source, CameraSourceKind::TestPattern);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            control_port = 8080

            [camera]
            pixel_format = "rgb565"
            width = 320
            height = 240

            [actuator]
            backend = "sysfs"
            flash_gpio = 17
            "#,
        )
        .unwrap();
        assert_eq!(config.server.stream_port(), Some(8081));
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.camera.pixel_format, PixelFormat::Rgb565);
        assert_eq!(config.camera.frame_buffers, 2);
        assert_eq!(config.actuator.backend, ActuatorBackend::Sysfs);
        assert_eq!(config.actuator.flash_gpio, 17);
        assert_eq!(config.actuator.settle_ms, 10);
    }

    #[test]
    fn last_port_is_rejected() {
        let err = Config::parse("[server]\ncontrol_port = 65535\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn boundary_with_spaces_is_rejected() {
        let err = Config::parse("[stream]\nboundary = \"a b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn initial_position_outside_range_is_rejected() {
        let err = Config::parse("[actuator]\ninitial_position = 175\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn jpeg_dir_source_needs_a_directory() {
        let err = Config::parse("[camera]\nsource = \"jpeg-dir\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_pixel_format_is_a_parse_error() {
        let err = Config::parse("[camera]\npixel_format = \"bayer\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/wellcam.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/wellcam.toml"));
    }
}
