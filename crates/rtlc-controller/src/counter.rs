//! Photomultiplier pulse counting over a dwell window.

use std::time::Duration;

use crate::error::ControllerError;
use crate::hal::{InputLine, Rig, ScanHardware};

/// Count sensor pulses for `dwell`.
///
/// The sensor is polled; every time it is found asserted one pulse is counted and
/// polling pauses until the line releases, so a pulse that stays asserted across
/// several polls is counted once. The wait for release is bounded by the end of the
/// window, so a stuck sensor cannot hang the loop. The function never returns
/// before `dwell` has elapsed on the rig's clock.
pub fn count_pulses<H: ScanHardware>(
    rig: &mut Rig<H>,
    dwell: Duration,
) -> Result<u32, ControllerError> {
    let deadline = rig.now() + dwell;
    let mut count = 0u32;

    while rig.now() < deadline {
        if rig.is_asserted(InputLine::Sensor)? {
            count = count.saturating_add(1);
            while rig.is_asserted(InputLine::Sensor)? {
                if rig.now() >= deadline {
                    break;
                }
            }
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimulatedRig};
    use rtlc_core::config::LinePolarity;

    fn rig(config: SimConfig) -> Rig<SimulatedRig> {
        Rig::new(SimulatedRig::new(config), LinePolarity::default())
    }

    #[test]
    fn counts_each_pulse_once() {
        // 10 ms period, 2 ms wide pulses, polled every 50 µs: each pulse is seen
        // asserted ~40 times in a row but counted once.
        let mut rig = rig(SimConfig {
            pulse_period: Duration::from_millis(10),
            pulse_width: Duration::from_millis(2),
            poll_cost: Duration::from_micros(50),
            ..SimConfig::default()
        });
        let count = count_pulses(&mut rig, Duration::from_secs(1)).unwrap();
        assert!((99..=101).contains(&count), "count = {count}");
    }

    #[test]
    fn dwell_is_never_shorter_than_requested() {
        let mut rig = rig(SimConfig::default());
        let start = rig.now();
        count_pulses(&mut rig, Duration::from_millis(750)).unwrap();
        assert!(rig.now() - start >= Duration::from_millis(750));
    }

    #[test]
    fn quiet_sensor_counts_zero() {
        let mut rig = rig(SimConfig {
            pulse_period: Duration::ZERO,
            ..SimConfig::default()
        });
        assert_eq!(count_pulses(&mut rig, Duration::from_millis(100)).unwrap(), 0);
    }

    #[test]
    fn stuck_sensor_does_not_hang() {
        let mut rig = rig(SimConfig {
            pulse_period: Duration::from_millis(10),
            pulse_width: Duration::from_millis(10),
            ..SimConfig::default()
        });
        let count = count_pulses(&mut rig, Duration::from_millis(100)).unwrap();
        assert_eq!(count, 1);
    }
}
