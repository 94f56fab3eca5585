use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{FlashOutput, HardwareError, ServoOutput};

/// Servo stand-in for hosts without PWM hardware. Clones share the same history.
#[derive(Clone, Default)]
pub struct SimServo {
    history: Arc<Mutex<Vec<u16>>>,
}

impl SimServo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<u16> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn last_angle(&self) -> Option<u16> {
        self.writes().last().copied()
    }
}

impl ServoOutput for SimServo {
    fn write_angle(&mut self, degrees: u16) -> Result<(), HardwareError> {
        if degrees > 180 {
            return Err(HardwareError::AngleOutOfRange(degrees));
        }
        debug!(degrees, "simulated servo write");
        if let Ok(mut history) = self.history.lock() {
            history.push(degrees);
        }
        Ok(())
    }
}

/// Flash pin stand-in. Clones share the same history.
#[derive(Clone, Default)]
pub struct SimFlash {
    history: Arc<Mutex<Vec<bool>>>,
}

impl SimFlash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<bool> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Level the pin was last driven to.
    pub fn level(&self) -> Option<bool> {
        self.writes().last().copied()
    }
}

impl FlashOutput for SimFlash {
    fn set_level(&mut self, high: bool) -> Result<(), HardwareError> {
        debug!(high, "simulated flash write");
        if let Ok(mut history) = self.history.lock() {
            history.push(high);
        }
        Ok(())
    }
}
