//! RTLC linear-scan radiation detector.
//!
//! - [`rtlc_core`]: request model, wire protocol, configuration, logging, serial helpers
//! - [`rtlc_controller`]: the embedded scan controller and its simulated rig
//! - [`rtlc_session`]: host acquisition, rendering and persistence
//!
//! The `rtlc` binary is the operator's entry point; `rtlc-controller` runs the
//! control loop over stdio against the simulated rig.

pub use rtlc_controller as controller;
pub use rtlc_core as core;
pub use rtlc_session as session;

#[cfg(unix)]
pub mod simulated;

use rtlc_controller::{ClockMode, SimConfig};
use rtlc_core::config::RtlcConfig;

/// Simulated rig parameters matching a deployment's configuration.
///
/// The far switch sits 10 mm past the largest accepted range.
pub fn sim_config(config: &RtlcConfig, realtime: bool) -> SimConfig {
    SimConfig {
        steps_per_mm: config.controller.steps_per_mm,
        far_limit_mm: config.limits.max_range_mm + 10,
        polarity: config.controller.lines,
        clock: if realtime {
            ClockMode::Realtime
        } else {
            ClockMode::Virtual
        },
        ..SimConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_config_follows_deployment() {
        let mut config = RtlcConfig::default();
        config.controller.steps_per_mm = 400;
        let rig = sim_config(&config, true);
        assert_eq!(rig.steps_per_mm, 400);
        assert_eq!(rig.far_limit_mm, 160);
        assert_eq!(rig.clock, ClockMode::Realtime);
        assert_eq!(sim_config(&config, false).clock, ClockMode::Virtual);
    }
}
