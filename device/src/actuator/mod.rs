pub mod sim;
pub mod sysfs;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{info, warn};
use wellcam_common::config::{ActuatorBackend, ActuatorConfig};

use crate::dispatch::Command;

pub use sim::{SimFlash, SimServo};
pub use sysfs::{SysfsGpioFlash, SysfsPwmServo};

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("angle {0} is outside 0..=180")]
    AngleOutOfRange(u16),
}

/// Pan servo output.
pub trait ServoOutput: Send {
    fn write_angle(&mut self, degrees: u16) -> Result<(), HardwareError>;
}

/// Flash LED output pin.
pub trait FlashOutput: Send {
    fn set_level(&mut self, high: bool) -> Result<(), HardwareError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoLimits {
    pub min: u16,
    pub max: u16,
    pub step: u16,
}

impl Default for ServoLimits {
    fn default() -> Self {
        Self {
            min: 10,
            max: 170,
            step: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorState {
    pub servo_position: u16,
    pub flash_on: bool,
}

struct Inner {
    state: ActuatorState,
    servo: Box<dyn ServoOutput>,
    flash: Box<dyn FlashOutput>,
}

/// Sole owner of the servo position and flash state.
///
/// Every operation takes the same lock, so concurrent commands are applied
/// one at a time and the hardware always sees the value held in `state`.
pub struct ActuatorController {
    inner: Mutex<Inner>,
    limits: ServoLimits,
    settle: Duration,
}

impl ActuatorController {
    /// Drives the servo to `initial_position` and the flash pin low.
    pub fn new(
        mut servo: Box<dyn ServoOutput>,
        mut flash: Box<dyn FlashOutput>,
        limits: ServoLimits,
        initial_position: u16,
        settle: Duration,
    ) -> Self {
        let initial_position = initial_position.clamp(limits.min, limits.max);
        if let Err(e) = servo.write_angle(initial_position) {
            warn!(error = %e, "failed to drive servo to initial position");
        }
        if let Err(e) = flash.set_level(false) {
            warn!(error = %e, "failed to drive flash pin low");
        }
        Self {
            inner: Mutex::new(Inner {
                state: ActuatorState {
                    servo_position: initial_position,
                    flash_on: false,
                },
                servo,
                flash,
            }),
            limits,
            settle,
        }
    }

    pub fn from_config(config: &ActuatorConfig) -> Result<Self, HardwareError> {
        let (servo, flash): (Box<dyn ServoOutput>, Box<dyn FlashOutput>) = match config.backend {
            ActuatorBackend::Simulated => (Box::new(SimServo::new()), Box::new(SimFlash::new())),
            ActuatorBackend::Sysfs => (
                Box::new(SysfsPwmServo::open(config)?),
                Box::new(SysfsGpioFlash::open(config)?),
            ),
        };
        let limits = ServoLimits {
            min: config.min_position,
            max: config.max_position,
            step: config.step,
        };
        Ok(Self::new(
            servo,
            flash,
            limits,
            config.initial_position,
            Duration::from_millis(config.settle_ms),
        ))
    }

    /// Steps the servo one increment up, unless that would pass the upper limit.
    pub fn move_left(&self) {
        let step = self.limits.step;
        let max = self.limits.max;
        self.move_servo("left", |pos| pos.checked_add(step).filter(|p| *p <= max));
    }

    /// Steps the servo one increment down, unless that would pass the lower limit.
    pub fn move_right(&self) {
        let step = self.limits.step;
        let min = self.limits.min;
        self.move_servo("right", |pos| pos.checked_sub(step).filter(|p| *p >= min));
    }

    pub fn flash_on(&self) {
        self.set_flash(true);
    }

    pub fn flash_off(&self) {
        self.set_flash(false);
    }

    pub fn apply(&self, command: Command) {
        match command {
            Command::Left => self.move_left(),
            Command::Right => self.move_right(),
            Command::FlashOn => self.flash_on(),
            Command::FlashOff => self.flash_off(),
            Command::Unknown => {}
        }
    }

    pub fn snapshot(&self) -> ActuatorState {
        self.lock().state
    }

    fn move_servo(&self, direction: &str, next: impl FnOnce(u16) -> Option<u16>) {
        let mut inner = self.lock();
        let current = inner.state.servo_position;
        let Some(target) = next(current) else {
            info!(position = current, direction, "servo at limit");
            return;
        };

        inner.state.servo_position = target;
        if let Err(e) = inner.servo.write_angle(target) {
            warn!(position = target, error = %e, "servo write failed");
        }
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        info!(position = target, direction, "servo moved");
    }

    fn set_flash(&self, on: bool) {
        let mut inner = self.lock();
        inner.state.flash_on = on;
        if let Err(e) = inner.flash.set_level(on) {
            warn!(on, error = %e, "flash write failed");
        }
        info!(on, "flash toggled");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is ignored: `state` fields are only ever assigned whole.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn controller(initial: u16) -> (ActuatorController, SimServo, SimFlash) {
        let servo = SimServo::new();
        let flash = SimFlash::new();
        let ctl = ActuatorController::new(
            Box::new(servo.clone()),
            Box::new(flash.clone()),
            ServoLimits::default(),
            initial,
            Duration::ZERO,
        );
        (ctl, servo, flash)
    }

    #[test]
    fn construction_drives_outputs_to_initial_state() {
        let (ctl, servo, flash) = controller(90);
        assert_eq!(servo.last_angle(), Some(90));
        assert_eq!(flash.level(), Some(false));
        assert_eq!(
            ctl.snapshot(),
            ActuatorState {
                servo_position: 90,
                flash_on: false
            }
        );
    }

    #[test]
    fn left_then_right_round_trips_inside_the_range() {
        for start in (20..=160).step_by(10) {
            let (ctl, _, _) = controller(start);
            ctl.move_left();
            ctl.move_right();
            assert_eq!(ctl.snapshot().servo_position, start);

            ctl.move_right();
            ctl.move_left();
            assert_eq!(ctl.snapshot().servo_position, start);
        }
    }

    #[test]
    fn left_stops_at_upper_limit() {
        let (ctl, servo, _) = controller(160);
        ctl.move_left();
        assert_eq!(ctl.snapshot().servo_position, 170);
        ctl.move_left();
        assert_eq!(ctl.snapshot().servo_position, 170);
        assert_eq!(servo.writes(), vec![160, 170]);
    }

    #[test]
    fn right_stops_at_lower_limit() {
        let (ctl, servo, _) = controller(20);
        ctl.move_right();
        ctl.move_right();
        ctl.move_right();
        assert_eq!(ctl.snapshot().servo_position, 10);
        assert_eq!(servo.writes(), vec![20, 10]);
    }

    #[test]
    fn position_never_leaves_the_range() {
        let (ctl, _, _) = controller(90);
        for i in 0..200 {
            if i % 3 == 0 {
                ctl.move_right();
            } else {
                ctl.move_left();
            }
            let pos = ctl.snapshot().servo_position;
            assert!((10..=170).contains(&pos), "position {pos} out of range");
        }
    }

    #[test]
    fn flash_drives_the_pin() {
        let (ctl, _, flash) = controller(90);
        ctl.apply(Command::FlashOn);
        assert_eq!(flash.level(), Some(true));
        assert!(ctl.snapshot().flash_on);
        ctl.apply(Command::FlashOff);
        assert_eq!(flash.level(), Some(false));
        assert!(!ctl.snapshot().flash_on);
    }

    #[test]
    fn unknown_command_changes_nothing() {
        let (ctl, servo, flash) = controller(90);
        let before = ctl.snapshot();
        ctl.apply(Command::Unknown);
        assert_eq!(ctl.snapshot(), before);
        assert_eq!(servo.writes(), vec![90]);
        assert_eq!(flash.writes(), vec![false]);
    }

    #[test]
    fn concurrent_moves_are_not_lost() {
        let (ctl, servo, _) = controller(10);
        let ctl = Arc::new(ctl);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ctl = Arc::clone(&ctl);
                thread::spawn(move || ctl.move_left())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ctl.snapshot().servo_position, 170);
        assert_eq!(servo.last_angle(), Some(170));
        assert_eq!(servo.writes().len(), 17);
    }

    struct BrokenServo;

    impl ServoOutput for BrokenServo {
        fn write_angle(&mut self, _degrees: u16) -> Result<(), HardwareError> {
            Err(HardwareError::AngleOutOfRange(999))
        }
    }

    #[test]
    fn hardware_failure_does_not_block_state_updates() {
        let ctl = ActuatorController::new(
            Box::new(BrokenServo),
            Box::new(SimFlash::new()),
            ServoLimits::default(),
            90,
            Duration::ZERO,
        );
        ctl.move_left();
        assert_eq!(ctl.snapshot().servo_position, 100);
    }
}
