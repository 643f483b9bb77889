//! Controller error types.

use thiserror::Error;

/// Failure reported by a hardware backend for one line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line '{line}': {message}")]
pub struct HardwareError {
    /// Name of the line that failed.
    pub line: String,
    /// Backend-specific description.
    pub message: String,
}

impl HardwareError {
    /// Create a hardware error for a named line.
    pub fn new(line: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            message: message.into(),
        }
    }
}

/// Errors raised inside the control loop.
///
/// None of these reach the wire: the loop logs them, disables the actuator and
/// returns to awaiting a request. The only exception is [`ControllerError::SourceClosed`],
/// which ends the loop.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// A line could not be driven or sampled.
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Writing to the host failed.
    #[error("Transport I/O error: {0}")]
    Transport(#[from] std::io::Error),

    /// No further requests can arrive.
    #[error("Request source closed")]
    SourceClosed,

    /// Homing used up its travel without the home switch asserting.
    #[error("Home switch not reached after {travelled_mm} mm of travel")]
    HomingTravelExceeded {
        /// Distance driven toward home.
        travelled_mm: u32,
    },
}
