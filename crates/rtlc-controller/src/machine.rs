//! Scan state machine.
//!
//! ```text
//! Idle -> AwaitingRequest -> Homing(Initial) -> Scanning -> Homing(Final) -> Complete
//!                                                  |
//!                                                  v
//!                                                Fault -> Homing(Recovery) -> AwaitingRequest
//! ```
//!
//! [`ScanController::advance`] performs one transition. The outer loop in
//! [`ScanController::run`] drives transitions cycle after cycle; a fault returns to
//! `AwaitingRequest` by unwinding to that loop, never by re-entering it.

use std::io::Write;
use std::time::Duration;

use rtlc_core::config::ControllerConfig;
use rtlc_core::{DeviceLine, RequestLimits, Sample, ScanRequest, SentinelStatus};
use tracing::{debug, error, info, warn};

use crate::counter::count_pulses;
use crate::error::ControllerError;
use crate::hal::{Rig, ScanHardware};
use crate::motion::{Actuator, MotionOutcome};
use crate::transport::LineSource;

/// A scan in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScan {
    request: ScanRequest,
    emitted: usize,
}

impl ActiveScan {
    /// Start a scan at the home position.
    pub fn new(request: ScanRequest) -> Self {
        Self {
            request,
            emitted: 0,
        }
    }

    /// The request being executed.
    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// Samples emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Position of the next sample, in tenths of a millimetre.
    pub fn next_position(&self) -> u32 {
        // emitted is bounded by 2R + 1 and R by the device limits
        self.emitted as u32 * rtlc_core::protocol::POSITION_STEP_TENTH_MM
    }
}

/// Why the carriage is being driven home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Homing {
    /// Before the first measurement.
    Initial(ActiveScan),
    /// After the last measurement.
    Final(ActiveScan),
    /// After a far-limit fault.
    Recovery(ActiveScan),
}

/// Controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// Power-up; the driver is released on the way out.
    Idle,
    /// Waiting for a request line.
    AwaitingRequest,
    /// Driving toward the home switch.
    Homing(Homing),
    /// Measuring positions.
    Scanning(ActiveScan),
    /// All positions measured and the carriage is home.
    Complete(ActiveScan),
    /// The far limit switch tripped during outward motion.
    Fault(ActiveScan),
}

/// How a scan cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every position was measured.
    Completed,
    /// The far limit switch tripped; the carriage was homed.
    Faulted,
    /// An unexpected error ended the scan; the driver was released where it stood.
    Aborted,
}

/// Summary of one served request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// The request that was served.
    pub request: ScanRequest,
    /// Sample lines written.
    pub samples: usize,
    /// How the cycle ended.
    pub outcome: CycleOutcome,
}

#[derive(Debug)]
struct InFlight {
    request: ScanRequest,
    samples: usize,
    sentinel_sent: bool,
}

impl InFlight {
    fn into_report(self, outcome: CycleOutcome) -> CycleReport {
        CycleReport {
            request: self.request,
            samples: self.samples,
            outcome,
        }
    }
}

/// The control loop: one owner of the rig, the request source and the output sink.
pub struct ScanController<H, S, W> {
    rig: Rig<H>,
    actuator: Actuator,
    source: S,
    sink: W,
    limits: RequestLimits,
    request_poll: Duration,
    tagged_sentinel: bool,
    in_flight: Option<InFlight>,
    finished: Option<CycleReport>,
}

impl<H, S, W> ScanController<H, S, W>
where
    H: ScanHardware,
    S: LineSource,
    W: Write,
{
    /// Build a controller. Requests are accepted for ranges up to the configured
    /// homing travel.
    pub fn new(hardware: H, source: S, sink: W, config: &ControllerConfig) -> Self {
        Self {
            rig: Rig::new(hardware, config.lines),
            actuator: Actuator::from_config(config),
            source,
            sink,
            limits: RequestLimits::new(1, config.max_homing_travel_mm),
            request_poll: config.request_poll(),
            tagged_sentinel: config.tagged_sentinel,
            in_flight: None,
            finished: None,
        }
    }

    /// Replace the limits applied to incoming requests.
    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The rig, with polarities applied.
    pub fn rig(&self) -> &Rig<H> {
        &self.rig
    }

    /// The output sink.
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Whether the stepper driver is energised.
    pub fn is_actuator_enabled(&self) -> bool {
        self.actuator.is_enabled()
    }

    /// Take the controller apart.
    pub fn into_parts(self) -> (H, S, W) {
        (self.rig.into_inner(), self.source, self.sink)
    }

    /// Serve requests until the source closes.
    pub fn run(&mut self) -> Result<(), ControllerError> {
        info!(
            min_range_mm = self.limits.min_range_mm,
            max_range_mm = self.limits.max_range_mm,
            tagged_sentinel = self.tagged_sentinel,
            "Scan controller ready"
        );

        while let Some(report) = self.serve_one()? {
            info!(
                batch = report.request.batch_id(),
                samples = report.samples,
                outcome = ?report.outcome,
                "Scan cycle finished"
            );
        }

        self.actuator.disable(&mut self.rig)?;
        info!("Request source closed, controller stopping");
        Ok(())
    }

    /// Run one cycle: wait for a request and carry it through to the driver being
    /// released again.
    ///
    /// Returns `Ok(None)` when the source closes before a request arrives. An error
    /// during a scan ends that scan (see [`CycleOutcome::Aborted`]) and is reported
    /// in the returned cycle rather than propagated.
    pub fn serve_one(&mut self) -> Result<Option<CycleReport>, ControllerError> {
        let mut state = ScanState::Idle;
        loop {
            state = match self.advance(state) {
                Ok(next) => next,
                Err(ControllerError::SourceClosed) => return Ok(None),
                Err(err) => return self.recover(err).map(Some),
            };
            if let Some(report) = self.finished.take() {
                return Ok(Some(report));
            }
        }
    }

    /// Perform one state transition.
    pub fn advance(&mut self, state: ScanState) -> Result<ScanState, ControllerError> {
        match state {
            ScanState::Idle => {
                self.actuator.disable(&mut self.rig)?;
                Ok(ScanState::AwaitingRequest)
            }
            ScanState::AwaitingRequest => self.await_request(),
            ScanState::Homing(Homing::Initial(scan)) => {
                let travelled_mm = self.actuator.home(&mut self.rig)?;
                debug!(travelled_mm, "Initial homing complete");
                Ok(ScanState::Scanning(scan))
            }
            ScanState::Scanning(scan) => self.measure(scan),
            ScanState::Homing(Homing::Final(scan)) => {
                self.actuator.home(&mut self.rig)?;
                Ok(ScanState::Complete(scan))
            }
            ScanState::Complete(scan) => {
                self.actuator.disable(&mut self.rig)?;
                info!(
                    batch = scan.request.batch_id(),
                    samples = scan.emitted,
                    "Scan complete"
                );
                self.finish(CycleOutcome::Completed);
                Ok(ScanState::AwaitingRequest)
            }
            ScanState::Fault(scan) => {
                warn!(
                    batch = scan.request.batch_id(),
                    samples = scan.emitted,
                    expected = scan.request.expected_samples(),
                    "Far limit switch asserted, abandoning scan"
                );
                self.emit_sentinel(SentinelStatus::Fault)?;
                Ok(ScanState::Homing(Homing::Recovery(scan)))
            }
            ScanState::Homing(Homing::Recovery(_)) => {
                self.actuator.home(&mut self.rig)?;
                self.actuator.disable(&mut self.rig)?;
                self.finish(CycleOutcome::Faulted);
                Ok(ScanState::AwaitingRequest)
            }
        }
    }

    fn await_request(&mut self) -> Result<ScanState, ControllerError> {
        let Some(line) = self.source.poll_line(self.request_poll)? else {
            return Ok(ScanState::AwaitingRequest);
        };
        if line.trim().is_empty() {
            return Ok(ScanState::AwaitingRequest);
        }

        match ScanRequest::parse_wire(&line, &self.limits) {
            Ok(request) => {
                info!(
                    batch = request.batch_id(),
                    operator = request.operator(),
                    range_mm = request.range_mm(),
                    duration_min = request.duration_min(),
                    dwell_s = request.dwell().as_secs_f64(),
                    "Scan request accepted"
                );
                self.in_flight = Some(InFlight {
                    request: request.clone(),
                    samples: 0,
                    sentinel_sent: false,
                });
                self.actuator.enable(&mut self.rig)?;
                Ok(ScanState::Homing(Homing::Initial(ActiveScan::new(request))))
            }
            Err(err) => {
                warn!(line = %line, error = %err, "Ignoring malformed request");
                Ok(ScanState::AwaitingRequest)
            }
        }
    }

    fn measure(&mut self, mut scan: ActiveScan) -> Result<ScanState, ControllerError> {
        let position = scan.next_position();
        let count = count_pulses(&mut self.rig, scan.request.dwell())?;
        self.emit(&DeviceLine::Sample(Sample::new(position, count)))?;
        scan.emitted += 1;
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.samples = scan.emitted;
        }
        debug!(position_tenth_mm = position, count, "Sample emitted");

        if position >= scan.request.final_position_tenth_mm() {
            self.emit_sentinel(SentinelStatus::Ok)?;
            return Ok(ScanState::Homing(Homing::Final(scan)));
        }

        match self.actuator.advance_half_mm(&mut self.rig)? {
            MotionOutcome::FarLimit => Ok(ScanState::Fault(scan)),
            MotionOutcome::Completed | MotionOutcome::HomeReached => Ok(ScanState::Scanning(scan)),
        }
    }

    fn emit(&mut self, line: &DeviceLine) -> Result<(), ControllerError> {
        writeln!(self.sink, "{line}")?;
        self.sink.flush()?;
        Ok(())
    }

    fn emit_sentinel(&mut self, status: SentinelStatus) -> Result<(), ControllerError> {
        let status = if self.tagged_sentinel {
            status
        } else {
            SentinelStatus::Untagged
        };
        self.emit(&DeviceLine::End(status))?;
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.sentinel_sent = true;
        }
        Ok(())
    }

    fn finish(&mut self, outcome: CycleOutcome) {
        self.finished = self
            .in_flight
            .take()
            .map(|in_flight| in_flight.into_report(outcome));
    }

    /// Close out a scan that failed with `err`: end the stream if it is still open
    /// and release the driver. Errors outside a scan are returned unchanged.
    fn recover(&mut self, err: ControllerError) -> Result<CycleReport, ControllerError> {
        let Some(in_flight) = self.in_flight.take() else {
            return Err(err);
        };
        error!(
            batch = in_flight.request.batch_id(),
            samples = in_flight.samples,
            error = %err,
            "Scan aborted"
        );

        if !in_flight.sentinel_sent {
            let status = if self.tagged_sentinel {
                SentinelStatus::Fault
            } else {
                SentinelStatus::Untagged
            };
            if let Err(e) = self.emit(&DeviceLine::End(status)) {
                warn!(error = %e, "Could not send sentinel after abort");
            }
        }
        if let Err(e) = self.actuator.disable(&mut self.rig) {
            error!(error = %e, "Could not release stepper driver");
        }

        Ok(in_flight.into_report(CycleOutcome::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::hal::InputLine;
    use crate::sim::{SimConfig, SimHandle, SimulatedRig};
    use crate::transport::ScriptedLines;

    type TestController = ScanController<SimulatedRig, ScriptedLines, Vec<u8>>;

    fn controller(lines: ScriptedLines, config: ControllerConfig) -> (TestController, SimHandle) {
        controller_on(SimConfig::default(), lines, Vec::new(), config)
    }

    fn controller_on<W: Write>(
        sim: SimConfig,
        lines: ScriptedLines,
        sink: W,
        config: ControllerConfig,
    ) -> (ScanController<SimulatedRig, ScriptedLines, W>, SimHandle) {
        let sim = SimulatedRig::new(sim);
        let handle = sim.handle();
        (ScanController::new(sim, lines, sink, &config), handle)
    }

    fn lines_of(bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn output(controller: &TestController) -> Vec<String> {
        lines_of(controller.sink())
    }

    fn sentinels(lines: &[String]) -> usize {
        lines.iter().filter(|l| l.starts_with("end")).count()
    }

    /// Host side of the link: accepts `lines_left` complete lines, then fails the
    /// next `failures` writes.
    struct HostLink {
        written: Vec<u8>,
        lines_left: usize,
        failures: usize,
    }

    impl HostLink {
        fn drops_after(lines: usize, failures: usize) -> Self {
            Self {
                written: Vec::new(),
                lines_left: lines,
                failures,
            }
        }
    }

    impl Write for HostLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.lines_left == 0 && self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "host gone"));
            }
            let newlines = buf.iter().filter(|&&b| b == b'\n').count();
            self.lines_left = self.lines_left.saturating_sub(newlines);
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn idle_releases_driver_and_waits() {
        let (mut ctl, handle) = controller(ScriptedLines::default(), ControllerConfig::default());
        let next = ctl.advance(ScanState::Idle).unwrap();
        assert_eq!(next, ScanState::AwaitingRequest);
        assert!(!handle.is_enabled());
    }

    #[test]
    fn accepted_request_enables_and_homes_first() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["B1,ann,10,1"]),
            ControllerConfig::default(),
        );
        let state = ctl.advance(ScanState::AwaitingRequest).unwrap();
        assert!(matches!(state, ScanState::Homing(Homing::Initial(_))));
        assert!(handle.is_enabled());

        let state = ctl.advance(state).unwrap();
        assert!(matches!(state, ScanState::Scanning(ref s) if s.emitted() == 0));
        assert_eq!(handle.position_steps(), 0);
    }

    #[test]
    fn malformed_request_keeps_waiting_without_motion() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["nonsense", "B1,ann,ten,1", "B1,ann,0,1"]),
            ControllerConfig::default(),
        );
        for _ in 0..3 {
            assert_eq!(
                ctl.advance(ScanState::AwaitingRequest).unwrap(),
                ScanState::AwaitingRequest
            );
        }
        assert_eq!(handle.pulses_emitted(), 0);
        assert!(output(&ctl).is_empty());
    }

    #[test]
    fn final_position_emits_sentinel_before_homing() {
        let (mut ctl, _handle) = controller(
            ScriptedLines::new(["B1,ann,10,1"]),
            ControllerConfig::default(),
        );
        let request = ScanRequest::parse_wire("B1,ann,10,1", &RequestLimits::default()).unwrap();
        let scan = ActiveScan {
            request,
            emitted: 20,
        };
        let state = ctl.advance(ScanState::Scanning(scan)).unwrap();
        assert!(matches!(state, ScanState::Homing(Homing::Final(_))));
        assert_eq!(output(&ctl).last().map(String::as_str), Some("end"));
    }

    #[test]
    fn far_limit_during_scan_enters_fault() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["B1,ann,10,1"]),
            ControllerConfig::default(),
        );
        let state = ctl.advance(ScanState::AwaitingRequest).unwrap();
        let mut state = ctl.advance(state).unwrap();
        handle.trip_far_limit_at_mm(0.5);

        state = ctl.advance(state).unwrap();
        assert!(matches!(state, ScanState::Scanning(_)));
        state = ctl.advance(state).unwrap();
        assert!(matches!(state, ScanState::Fault(ref s) if s.emitted() == 2));

        state = ctl.advance(state).unwrap();
        assert!(matches!(state, ScanState::Homing(Homing::Recovery(_))));
        assert_eq!(output(&ctl).last().map(String::as_str), Some("end"));
    }

    #[test]
    fn tagged_sentinel_reports_fault() {
        let config = ControllerConfig {
            tagged_sentinel: true,
            ..ControllerConfig::default()
        };
        let (mut ctl, handle) = controller(ScriptedLines::new(["B1,ann,10,1"]), config);
        handle.trip_far_limit_at_mm(1.0);

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Faulted);
        assert_eq!(report.samples, 3);
        assert_eq!(output(&ctl).last().map(String::as_str), Some("end;fault"));
        assert_eq!(handle.position_steps(), 0);
        assert!(!handle.is_enabled());
    }

    #[test]
    fn homing_failure_aborts_and_releases_driver() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["B1,ann,10,1"]),
            ControllerConfig::default(),
        );
        handle.disconnect_home_switch();

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 0);
        assert_eq!(output(&ctl), vec!["end".to_string()]);
        assert!(!handle.is_enabled());
        assert!(!ctl.is_actuator_enabled());
    }

    #[test]
    fn closed_source_ends_serving() {
        let (mut ctl, _handle) = controller(ScriptedLines::default(), ControllerConfig::default());
        assert_eq!(ctl.serve_one().unwrap(), None);
    }

    #[test]
    fn sensor_read_error_mid_scan_aborts_and_releases_driver() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["B1,ann,10,1", "B2,ann,10,1"]),
            ControllerConfig::default(),
        );
        // A 3 s dwell polls the sensor about 30 000 times, so this fails inside
        // the second dwell.
        handle.fail_line_after(InputLine::Sensor, 45_000);

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 1);
        let lines = output(&ctl);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0;"));
        assert_eq!(lines[1], "end");
        assert!(!handle.is_enabled());
        assert!(!ctl.is_actuator_enabled());

        handle.clear_read_fault();
        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.request.batch_id(), "B2");
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(report.samples, 21);
        assert_eq!(sentinels(&output(&ctl)), 2);
        assert_eq!(handle.position_steps(), 0);
    }

    #[test]
    fn limit_read_error_while_advancing_aborts() {
        let (mut ctl, handle) = controller(
            ScriptedLines::new(["B1,ann,10,1"]),
            ControllerConfig::default(),
        );
        // 100 far-limit checks per half millimetre: the third advance fails.
        handle.fail_line_after(InputLine::FarLimit, 250);

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 3);
        let lines = output(&ctl);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.last().map(String::as_str), Some("end"));
        assert_eq!(sentinels(&lines), 1);
        assert!(!handle.is_enabled());
        assert_eq!(handle.position_mm(), 1.25);
    }

    #[test]
    fn failure_after_sentinel_does_not_repeat_it() {
        let sim = SimConfig {
            start_position_mm: 0,
            ..SimConfig::default()
        };
        let (mut ctl, handle) = controller_on(
            sim,
            ScriptedLines::new(["B1,ann,10,1"]),
            Vec::new(),
            ControllerConfig::default(),
        );
        // Initial homing reads the switch once; final homing fails on its first read.
        handle.fail_line_after(InputLine::HomeLimit, 1);

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 21);
        let lines = output(&ctl);
        assert_eq!(sentinels(&lines), 1);
        assert_eq!(lines.last().map(String::as_str), Some("end"));
        assert!(!handle.is_enabled());
    }

    #[test]
    fn host_gone_mid_scan_releases_driver() {
        let (mut ctl, handle) = controller_on(
            SimConfig::default(),
            ScriptedLines::new(["B1,ann,10,1"]),
            HostLink::drops_after(3, usize::MAX),
            ControllerConfig::default(),
        );

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 3);
        let lines = lines_of(&ctl.sink().written);
        assert_eq!(lines.len(), 3);
        assert_eq!(sentinels(&lines), 0);
        assert!(!handle.is_enabled());
        assert!(!ctl.is_actuator_enabled());
    }

    #[test]
    fn brief_link_failure_ends_scan_then_next_request_runs() {
        let (mut ctl, handle) = controller_on(
            SimConfig::default(),
            ScriptedLines::new(["B1,ann,10,1", "B2,ann,10,1"]),
            HostLink::drops_after(3, 1),
            ControllerConfig::default(),
        );

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Aborted);
        assert_eq!(report.samples, 3);
        assert!(!handle.is_enabled());

        let report = ctl.serve_one().unwrap().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(report.samples, 21);

        let lines = lines_of(&ctl.sink().written);
        assert_eq!(lines[3], "end");
        assert_eq!(lines.len(), 3 + 1 + 21 + 1);
        assert_eq!(sentinels(&lines), 2);
        assert!(!handle.is_enabled());
    }
}
