//! Simulated scan rig.
//!
//! A software stand-in for the carriage, stepper driver, limit switches and
//! photomultiplier. Two clock modes:
//!
//! - **Virtual** (default): time only advances when the controller delays or polls
//!   the sensor, so a multi-minute scan completes instantly and deterministically.
//! - **Realtime**: wall-clock time and real sleeps, for demonstrations against the
//!   host CLI.
//!
//! A [`SimHandle`] shares the rig's state so tests can inspect the carriage and
//! inject faults while the controller owns the rig: an early far-limit trip, a dead
//! home switch, or an input line whose reads start failing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtlc_core::config::LinePolarity;

use crate::error::HardwareError;
use crate::hal::{InputLine, OutputLine, ScanHardware};

/// Clock source for the simulated rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Simulated time, advanced by delays and sensor polls.
    Virtual,
    /// Wall-clock time.
    Realtime,
}

/// Simulated rig parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Stepper pulses per millimetre.
    pub steps_per_mm: u32,
    /// Carriage position at power-up.
    pub start_position_mm: u32,
    /// Position of the far limit switch.
    pub far_limit_mm: u32,
    /// Interval between photomultiplier pulses; zero for a quiet sensor.
    pub pulse_period: Duration,
    /// Duration a pulse keeps the sensor asserted.
    pub pulse_width: Duration,
    /// Virtual time consumed by one sensor poll.
    pub poll_cost: Duration,
    /// Line polarities the rig presents.
    pub polarity: LinePolarity,
    /// Clock source.
    pub clock: ClockMode,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 200,
            start_position_mm: 25,
            far_limit_mm: 160,
            pulse_period: Duration::from_millis(20),
            pulse_width: Duration::from_micros(500),
            poll_cost: Duration::from_micros(100),
            polarity: LinePolarity::default(),
            clock: ClockMode::Virtual,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadFault {
    line: InputLine,
    reads_left: u64,
}

#[derive(Debug)]
struct SimState {
    clock: Duration,
    position_steps: i64,
    enable_high: bool,
    pulse_high: bool,
    direction_high: bool,
    far_trip_steps: Option<i64>,
    home_connected: bool,
    read_fault: Option<ReadFault>,
    pulses_emitted: u64,
    pulses_while_disabled: u64,
    enable_changes: u64,
}

/// Simulated rig implementing [`ScanHardware`].
pub struct SimulatedRig {
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
    started: Instant,
}

impl SimulatedRig {
    /// Build a rig at its power-up position with the driver released.
    pub fn new(config: SimConfig) -> Self {
        let state = SimState {
            clock: Duration::ZERO,
            position_steps: i64::from(config.start_position_mm) * i64::from(config.steps_per_mm),
            enable_high: config.polarity.enable.level_for(false),
            pulse_high: config.polarity.pulse.level_for(false),
            direction_high: config.polarity.direction.level_for(false),
            far_trip_steps: None,
            home_connected: true,
            read_fault: None,
            pulses_emitted: 0,
            pulses_while_disabled: 0,
            enable_changes: 0,
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            started: Instant::now(),
        }
    }

    /// Shared handle for inspection and fault injection.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
            steps_per_mm: self.config.steps_per_mm,
            polarity: self.config.polarity,
        }
    }

    fn clock(&self, state: &SimState) -> Duration {
        match self.config.clock {
            ClockMode::Virtual => state.clock,
            ClockMode::Realtime => self.started.elapsed(),
        }
    }

    fn sensor_asserted(&self, now: Duration) -> bool {
        let period = self.config.pulse_period.as_nanos();
        if period == 0 {
            return false;
        }
        now.as_nanos() % period < self.config.pulse_width.as_nanos()
    }

    fn far_limit_steps(&self) -> i64 {
        i64::from(self.config.far_limit_mm) * i64::from(self.config.steps_per_mm)
    }
}

impl ScanHardware for SimulatedRig {
    fn write(&mut self, line: OutputLine, high: bool) -> Result<(), HardwareError> {
        let polarity = self.config.polarity;
        let far_end = self.far_limit_steps();
        let mut state = self.state.lock();
        match line {
            OutputLine::Enable => {
                if state.enable_high != high {
                    state.enable_changes += 1;
                }
                state.enable_high = high;
            }
            OutputLine::Direction => state.direction_high = high,
            OutputLine::Pulse => {
                let rising = polarity.pulse.is_asserted(high)
                    && !polarity.pulse.is_asserted(state.pulse_high);
                state.pulse_high = high;
                if rising {
                    state.pulses_emitted += 1;
                    if !polarity.enable.is_asserted(state.enable_high) {
                        state.pulses_while_disabled += 1;
                    } else if polarity.direction.is_asserted(state.direction_high) {
                        state.position_steps = (state.position_steps + 1).min(far_end);
                    } else {
                        state.position_steps = (state.position_steps - 1).max(0);
                    }
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, line: InputLine) -> Result<bool, HardwareError> {
        let polarity = self.config.polarity;
        let far_end = self.far_limit_steps();
        let mut state = self.state.lock();
        if let Some(fault) = state.read_fault.as_mut().filter(|f| f.line == line) {
            if fault.reads_left == 0 {
                return Err(HardwareError::new(line.to_string(), "read failed"));
            }
            fault.reads_left -= 1;
        }
        let asserted = match line {
            InputLine::Sensor => {
                let now = self.clock(&state);
                if self.config.clock == ClockMode::Virtual {
                    state.clock += self.config.poll_cost;
                }
                return Ok(polarity.sensor.level_for(self.sensor_asserted(now)));
            }
            InputLine::HomeLimit => state.home_connected && state.position_steps <= 0,
            InputLine::FarLimit => {
                let trip = state.far_trip_steps.unwrap_or(far_end);
                state.position_steps >= trip.min(far_end)
            }
        };
        let level = match line {
            InputLine::HomeLimit => polarity.home_limit.level_for(asserted),
            _ => polarity.far_limit.level_for(asserted),
        };
        Ok(level)
    }

    fn now(&mut self) -> Duration {
        let state = self.state.lock();
        self.clock(&state)
    }

    fn delay(&mut self, duration: Duration) {
        match self.config.clock {
            ClockMode::Virtual => self.state.lock().clock += duration,
            ClockMode::Realtime => std::thread::sleep(duration),
        }
    }
}

/// Shared view of a [`SimulatedRig`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    steps_per_mm: u32,
    polarity: LinePolarity,
}

impl SimHandle {
    /// Carriage position in motor steps from home.
    pub fn position_steps(&self) -> i64 {
        self.state.lock().position_steps
    }

    /// Carriage position in millimetres from home.
    pub fn position_mm(&self) -> f64 {
        self.position_steps() as f64 / f64::from(self.steps_per_mm)
    }

    /// Whether the stepper driver is energised.
    pub fn is_enabled(&self) -> bool {
        self.polarity.enable.is_asserted(self.state.lock().enable_high)
    }

    /// Simulated time elapsed (virtual clock only).
    pub fn elapsed(&self) -> Duration {
        self.state.lock().clock
    }

    /// Total step pulses seen by the driver.
    pub fn pulses_emitted(&self) -> u64 {
        self.state.lock().pulses_emitted
    }

    /// Step pulses issued while the driver was released.
    pub fn pulses_while_disabled(&self) -> u64 {
        self.state.lock().pulses_while_disabled
    }

    /// Number of enable line level changes.
    pub fn enable_changes(&self) -> u64 {
        self.state.lock().enable_changes
    }

    /// Make the far limit switch assert from `mm` onward, as if the carriage hit an
    /// obstruction before the end of travel.
    pub fn trip_far_limit_at_mm(&self, mm: f64) {
        let steps = (mm * f64::from(self.steps_per_mm)).round() as i64;
        self.state.lock().far_trip_steps = Some(steps);
    }

    /// Restore the far limit switch to its physical position.
    pub fn clear_far_limit_trip(&self) {
        self.state.lock().far_trip_steps = None;
    }

    /// Simulate a broken home switch that never asserts.
    pub fn disconnect_home_switch(&self) {
        self.state.lock().home_connected = false;
    }

    /// Let `reads` more reads of `line` succeed, then fail every read of it until
    /// [`clear_read_fault`](Self::clear_read_fault). Replaces any earlier fault.
    pub fn fail_line_after(&self, line: InputLine, reads: u64) {
        self.state.lock().read_fault = Some(ReadFault {
            line,
            reads_left: reads,
        });
    }

    /// Make every input line readable again.
    pub fn clear_read_fault(&self) {
        self.state.lock().read_fault = None;
    }
}
