//! Hardware line abstraction.
//!
//! The controller touches exactly six digital lines and a monotonic clock. A
//! backend implements [`ScanHardware`] in terms of raw levels; [`Rig`] layers the
//! configured [`LinePolarity`] on top so the rest of the controller only deals in
//! "asserted" / "not asserted".
//!
//! | Line | Direction | Asserted means |
//! |---|---|---|
//! | `Enable` | out | stepper driver energised |
//! | `Pulse` | out | step edge |
//! | `Direction` | out | moving away from home |
//! | `Sensor` | in | photomultiplier pulse present |
//! | `HomeLimit` | in | carriage at home end of travel |
//! | `FarLimit` | in | carriage at far end of travel |

use std::fmt;
use std::time::Duration;

use rtlc_core::config::LinePolarity;

use crate::error::HardwareError;

/// Digital outputs driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputLine {
    /// Stepper driver enable
    Enable,
    /// Stepper pulse
    Pulse,
    /// Stepper direction
    Direction,
}

/// Digital inputs sampled by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputLine {
    /// Photomultiplier pulse detector
    Sensor,
    /// Home-side limit switch
    HomeLimit,
    /// Far-side limit switch
    FarLimit,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputLine::Enable => "enable",
            OutputLine::Pulse => "pulse",
            OutputLine::Direction => "direction",
        })
    }
}

impl fmt::Display for InputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputLine::Sensor => "sensor",
            InputLine::HomeLimit => "home_limit",
            InputLine::FarLimit => "far_limit",
        })
    }
}

/// Raw access to the scan rig.
///
/// Implementations own the lines exclusively; the control loop is the single
/// caller for the life of the process.
pub trait ScanHardware {
    /// Drive an output to a raw level (`true` = high).
    fn write(&mut self, line: OutputLine, high: bool) -> Result<(), HardwareError>;

    /// Sample an input's raw level (`true` = high).
    fn read(&mut self, line: InputLine) -> Result<bool, HardwareError>;

    /// Monotonic time since an arbitrary, fixed origin.
    fn now(&mut self) -> Duration;

    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// A [`ScanHardware`] backend with line polarities applied.
pub struct Rig<H> {
    hw: H,
    polarity: LinePolarity,
}

impl<H: ScanHardware> Rig<H> {
    /// Wrap a backend.
    pub fn new(hw: H, polarity: LinePolarity) -> Self {
        Self { hw, polarity }
    }

    /// Drive an output to its asserted or released level.
    pub fn set(&mut self, line: OutputLine, asserted: bool) -> Result<(), HardwareError> {
        let polarity = match line {
            OutputLine::Enable => self.polarity.enable,
            OutputLine::Pulse => self.polarity.pulse,
            OutputLine::Direction => self.polarity.direction,
        };
        self.hw.write(line, polarity.level_for(asserted))
    }

    /// Whether an input is asserted.
    pub fn is_asserted(&mut self, line: InputLine) -> Result<bool, HardwareError> {
        let polarity = match line {
            InputLine::Sensor => self.polarity.sensor,
            InputLine::HomeLimit => self.polarity.home_limit,
            InputLine::FarLimit => self.polarity.far_limit,
        };
        Ok(polarity.is_asserted(self.hw.read(line)?))
    }

    /// Current time on the rig's clock.
    pub fn now(&mut self) -> Duration {
        self.hw.now()
    }

    /// Block on the rig's clock.
    pub fn delay(&mut self, duration: Duration) {
        self.hw.delay(duration)
    }

    /// Borrow the backend.
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Unwrap the backend.
    pub fn into_inner(self) -> H {
        self.hw
    }
}
