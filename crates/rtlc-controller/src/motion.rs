//! Stepper motion with limit-switch interlocks.
//!
//! Motion is pulse-by-pulse: before every pulse the limit switch in the direction of
//! travel is checked. Reaching home while moving toward it simply ends the segment;
//! reaching the far switch while moving away is reported to the caller as
//! [`MotionOutcome::FarLimit`], which the state machine treats as a fault.

use std::time::Duration;

use rtlc_core::config::ControllerConfig;
use tracing::{debug, warn};

use crate::error::ControllerError;
use crate::hal::{InputLine, OutputLine, Rig, ScanHardware};

/// Direction of carriage travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the home limit switch.
    TowardHome,
    /// Toward the far limit switch.
    AwayFromHome,
}

/// How a motion segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// Every requested pulse was emitted.
    Completed,
    /// The home switch asserted while moving toward home.
    HomeReached,
    /// The far switch asserted while moving away from home.
    FarLimit,
}

/// Stepper driver control.
#[derive(Debug, Clone)]
pub struct Actuator {
    steps_per_mm: u32,
    pulses_per_half_mm: u32,
    step_delay: Duration,
    max_homing_travel_mm: u32,
    enabled: bool,
}

impl Actuator {
    /// Actuator settings from controller configuration. Starts disabled.
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            steps_per_mm: config.steps_per_mm,
            pulses_per_half_mm: config.pulses_per_half_mm(),
            step_delay: config.step_delay(),
            max_homing_travel_mm: config.max_homing_travel_mm,
            enabled: false,
        }
    }

    /// Whether the driver is currently energised.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Energise the stepper driver.
    pub fn enable<H: ScanHardware>(&mut self, rig: &mut Rig<H>) -> Result<(), ControllerError> {
        rig.set(OutputLine::Enable, true)?;
        self.enabled = true;
        debug!("Actuator enabled");
        Ok(())
    }

    /// Release the stepper driver.
    pub fn disable<H: ScanHardware>(&mut self, rig: &mut Rig<H>) -> Result<(), ControllerError> {
        rig.set(OutputLine::Pulse, false)?;
        rig.set(OutputLine::Enable, false)?;
        self.enabled = false;
        debug!("Actuator disabled");
        Ok(())
    }

    /// Emit up to `pulses` step pulses in `direction`.
    pub fn step<H: ScanHardware>(
        &self,
        rig: &mut Rig<H>,
        pulses: u32,
        direction: Direction,
    ) -> Result<MotionOutcome, ControllerError> {
        rig.set(OutputLine::Direction, direction == Direction::AwayFromHome)?;

        for _ in 0..pulses {
            match direction {
                Direction::AwayFromHome if rig.is_asserted(InputLine::FarLimit)? => {
                    return Ok(MotionOutcome::FarLimit);
                }
                Direction::TowardHome if rig.is_asserted(InputLine::HomeLimit)? => {
                    return Ok(MotionOutcome::HomeReached);
                }
                _ => {}
            }

            rig.set(OutputLine::Pulse, true)?;
            rig.delay(self.step_delay);
            rig.set(OutputLine::Pulse, false)?;
            rig.delay(self.step_delay);
        }

        Ok(MotionOutcome::Completed)
    }

    /// Move one half-millimetre grid step away from home.
    pub fn advance_half_mm<H: ScanHardware>(
        &self,
        rig: &mut Rig<H>,
    ) -> Result<MotionOutcome, ControllerError> {
        self.step(rig, self.pulses_per_half_mm, Direction::AwayFromHome)
    }

    /// Drive toward home in one-millimetre segments until the home switch asserts.
    ///
    /// Returns the number of whole segments travelled. Gives up with
    /// [`ControllerError::HomingTravelExceeded`] once the configured travel is used
    /// up, which guards against a disconnected home switch.
    pub fn home<H: ScanHardware>(&self, rig: &mut Rig<H>) -> Result<u32, ControllerError> {
        let mut travelled_mm = 0;
        loop {
            if rig.is_asserted(InputLine::HomeLimit)? {
                debug!(travelled_mm, "Home switch asserted");
                return Ok(travelled_mm);
            }
            if travelled_mm >= self.max_homing_travel_mm {
                warn!(travelled_mm, "Homing travel exhausted");
                return Err(ControllerError::HomingTravelExceeded { travelled_mm });
            }
            match self.step(rig, self.steps_per_mm, Direction::TowardHome)? {
                MotionOutcome::HomeReached => return Ok(travelled_mm),
                _ => travelled_mm += 1,
            }
        }
    }
}
