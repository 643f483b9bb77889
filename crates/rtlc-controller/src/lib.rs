//! Embedded scan controller for the RTLC linear scanner.
//!
//! Turns one request line into a timed sweep of the detector carriage: home, then
//! measure every half millimetre up to the requested range, emitting
//! `positionTenthMm;count` per position and an `end` sentinel, then home again.
//!
//! # Layers
//!
//! - [`hal`]: six digital lines and a clock behind [`ScanHardware`], polarity in [`Rig`]
//! - [`motion`]: stepper pulses with limit-switch interlocks
//! - [`counter`]: edge-debounced pulse counting over a dwell window
//! - [`machine`]: the [`ScanState`] machine and the outer control loop
//! - [`transport`]: request line sources
//! - [`sim`]: a simulated rig with a virtual clock
//!
//! # Example
//!
//! ```rust
//! use rtlc_controller::{ScanController, ScriptedLines, SimConfig, SimulatedRig};
//! use rtlc_core::config::ControllerConfig;
//!
//! let rig = SimulatedRig::new(SimConfig::default());
//! let requests = ScriptedLines::new(["240125RF,ann,10,1"]);
//! let mut controller = ScanController::new(rig, requests, Vec::new(), &ControllerConfig::default());
//! controller.run().unwrap();
//!
//! let (_, _, wire) = controller.into_parts();
//! let wire = String::from_utf8(wire).unwrap();
//! assert_eq!(wire.lines().count(), 22);
//! assert_eq!(wire.lines().last(), Some("end"));
//! ```

pub mod counter;
pub mod error;
pub mod hal;
pub mod machine;
pub mod motion;
pub mod sim;
pub mod transport;

pub use error::{ControllerError, HardwareError};
pub use hal::{InputLine, OutputLine, Rig, ScanHardware};
pub use machine::{ActiveScan, CycleOutcome, CycleReport, Homing, ScanController, ScanState};
pub use motion::{Actuator, Direction, MotionOutcome};
pub use sim::{ClockMode, SimConfig, SimHandle, SimulatedRig};
pub use transport::{LineSource, ReaderLineSource, ScriptedLines};
