//! Linux sysfs backends for the servo (PWM class) and the flash LED (GPIO class).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use wellcam_common::config::ActuatorConfig;

use super::{FlashOutput, HardwareError, ServoOutput};

/// Standard hobby-servo frame.
const SERVO_PERIOD_NS: u64 = 20_000_000;
/// How long to wait for udev to create the attribute files after an export.
const EXPORT_POLLS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn write_attr(path: &Path, value: &str) -> Result<(), HardwareError> {
    std::fs::write(path, value).map_err(|source| HardwareError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Exports `index` through `export_file` unless `dir` already exists.
fn ensure_exported(dir: &Path, export_file: &Path, index: u32) -> Result<(), HardwareError> {
    if dir.exists() {
        return Ok(());
    }
    write_attr(export_file, &index.to_string())?;
    for _ in 0..EXPORT_POLLS {
        if dir.exists() {
            break;
        }
        std::thread::sleep(EXPORT_POLL_INTERVAL);
    }
    Ok(())
}

/// Servo on a sysfs PWM channel; angle maps linearly onto the pulse range.
pub struct SysfsPwmServo {
    channel_dir: PathBuf,
    min_pulse_ns: u64,
    max_pulse_ns: u64,
}

impl SysfsPwmServo {
    pub fn open(config: &ActuatorConfig) -> Result<Self, HardwareError> {
        let chip_dir = Path::new(&config.sysfs_root)
            .join("pwm")
            .join(format!("pwmchip{}", config.pwm_chip));
        let channel_dir = chip_dir.join(format!("pwm{}", config.pwm_channel));
        ensure_exported(&channel_dir, &chip_dir.join("export"), config.pwm_channel)?;

        write_attr(&channel_dir.join("period"), &SERVO_PERIOD_NS.to_string())?;
        write_attr(&channel_dir.join("enable"), "1")?;

        info!(
            channel = %channel_dir.display(),
            min_pulse_us = config.min_pulse_us,
            max_pulse_us = config.max_pulse_us,
            "PWM servo ready"
        );

        Ok(Self {
            channel_dir,
            min_pulse_ns: config.min_pulse_us as u64 * 1000,
            max_pulse_ns: config.max_pulse_us as u64 * 1000,
        })
    }

    fn duty_ns(&self, degrees: u16) -> u64 {
        let span = self.max_pulse_ns - self.min_pulse_ns;
        self.min_pulse_ns + span * degrees as u64 / 180
    }
}

impl ServoOutput for SysfsPwmServo {
    fn write_angle(&mut self, degrees: u16) -> Result<(), HardwareError> {
        if degrees > 180 {
            return Err(HardwareError::AngleOutOfRange(degrees));
        }
        let duty = self.duty_ns(degrees);
        debug!(degrees, duty_ns = duty, "servo duty cycle");
        write_attr(&self.channel_dir.join("duty_cycle"), &duty.to_string())
    }
}

/// Flash LED on a sysfs GPIO line configured as an output.
pub struct SysfsGpioFlash {
    value_path: PathBuf,
}

impl SysfsGpioFlash {
    pub fn open(config: &ActuatorConfig) -> Result<Self, HardwareError> {
        let gpio_root = Path::new(&config.sysfs_root).join("gpio");
        let pin_dir = gpio_root.join(format!("gpio{}", config.flash_gpio));
        ensure_exported(&pin_dir, &gpio_root.join("export"), config.flash_gpio)?;
        write_attr(&pin_dir.join("direction"), "out")?;

        info!(pin = config.flash_gpio, "GPIO flash ready");

        Ok(Self {
            value_path: pin_dir.join("value"),
        })
    }
}

impl FlashOutput for SysfsGpioFlash {
    fn set_level(&mut self, high: bool) -> Result<(), HardwareError> {
        write_attr(&self.value_path, if high { "1" } else { "0" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> ActuatorConfig {
        ActuatorConfig {
            sysfs_root: root.display().to_string(),
            flash_gpio: 4,
            pwm_chip: 0,
            pwm_channel: 1,
            ..ActuatorConfig::default()
        }
    }

    fn read(path: PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn gpio_flash_sets_direction_and_value() {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio/gpio4");
        std::fs::create_dir_all(&pin_dir).unwrap();

        let mut flash = SysfsGpioFlash::open(&config(root.path())).unwrap();
        assert_eq!(read(pin_dir.join("direction")), "out");

        flash.set_level(true).unwrap();
        assert_eq!(read(pin_dir.join("value")), "1");
        flash.set_level(false).unwrap();
        assert_eq!(read(pin_dir.join("value")), "0");
    }

    #[test]
    fn gpio_is_exported_when_missing() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("gpio")).unwrap();

        // Nothing creates the pin directory here, so configuring it fails
        // after the export request has been made.
        assert!(SysfsGpioFlash::open(&config(root.path())).is_err());
        assert_eq!(read(root.path().join("gpio/export")), "4");
    }

    #[test]
    fn pwm_servo_maps_angle_to_pulse_width() {
        let root = tempfile::tempdir().unwrap();
        let channel_dir = root.path().join("pwm/pwmchip0/pwm1");
        std::fs::create_dir_all(&channel_dir).unwrap();

        let mut servo = SysfsPwmServo::open(&config(root.path())).unwrap();
        assert_eq!(read(channel_dir.join("period")), "20000000");
        assert_eq!(read(channel_dir.join("enable")), "1");

        servo.write_angle(0).unwrap();
        assert_eq!(read(channel_dir.join("duty_cycle")), "1000000");
        servo.write_angle(90).unwrap();
        assert_eq!(read(channel_dir.join("duty_cycle")), "1500000");
        servo.write_angle(180).unwrap();
        assert_eq!(read(channel_dir.join("duty_cycle")), "2000000");
        assert!(servo.write_angle(181).is_err());
    }
}
