//! Full request-to-sentinel cycles on the simulated rig.

use std::io::{Cursor, Write};
use std::time::Duration;

use anyhow::Result;
use rtlc_controller::*;
use rtlc_core::config::ControllerConfig;
use rtlc_core::{DeviceLine, SentinelStatus};

/// Sink that records the rig clock at which each line was completed.
struct TimedSink {
    handle: SimHandle,
    partial: Vec<u8>,
    lines: Vec<(Duration, String)>,
}

impl TimedSink {
    fn new(handle: SimHandle) -> Self {
        Self {
            handle,
            partial: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn decoded(&self) -> Vec<DeviceLine> {
        self.lines
            .iter()
            .map(|(_, line)| DeviceLine::decode(line).expect("controller wrote an invalid line"))
            .collect()
    }
}

impl Write for TimedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &byte in buf {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.lines.push((self.handle.elapsed(), line));
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn rig() -> (SimulatedRig, SimHandle) {
    let sim = SimulatedRig::new(SimConfig::default());
    let handle = sim.handle();
    (sim, handle)
}

fn positions(lines: &[DeviceLine]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| match line {
            DeviceLine::Sample(sample) => Some(sample.position_tenth_mm),
            DeviceLine::End(_) => None,
        })
        .collect()
}

#[test]
fn twenty_mm_two_minute_scan() -> Result<()> {
    let (sim, handle) = rig();
    let mut controller = ScanController::new(
        sim,
        ScriptedLines::new(["240125RF,ann,20,2"]),
        TimedSink::new(handle.clone()),
        &ControllerConfig::default(),
    );

    let report = controller.serve_one()?.expect("request should be served");
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.samples, 41);

    let sink = controller.sink();
    let lines = sink.decoded();
    assert_eq!(lines.len(), 42);
    assert_eq!(positions(&lines), (0..=200).step_by(5).collect::<Vec<u32>>());
    assert_eq!(lines.last(), Some(&DeviceLine::End(SentinelStatus::Untagged)));

    // 2 min over 40 half-millimetre steps: 3 s of counting per position
    for pair in sink.lines[..41].windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(3));
    }
    assert!(sink.lines[0].0 >= Duration::from_secs(3));

    assert_eq!(handle.position_steps(), 0);
    assert!(!handle.is_enabled());
    Ok(())
}

#[test]
fn sentinel_is_written_once_and_last() -> Result<()> {
    let (sim, _handle) = rig();
    let mut controller = ScanController::new(
        sim,
        ScriptedLines::new(["B7,bob,10,1"]),
        Vec::new(),
        &ControllerConfig::default(),
    );
    controller.run()?;

    let (_, _, wire) = controller.into_parts();
    let wire = String::from_utf8(wire)?;
    let lines: Vec<&str> = wire.lines().collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with("end")).count(), 1);
    assert_eq!(lines.last(), Some(&"end"));
    assert_eq!(lines.len(), 22);
    Ok(())
}

#[test]
fn far_limit_fault_truncates_then_accepts_next_request() -> Result<()> {
    let (sim, handle) = rig();
    handle.trip_far_limit_at_mm(5.0);
    let mut controller = ScanController::new(
        sim,
        ScriptedLines::new(["240125RF,ann,20,2", "240125RF,ann,10,1"]),
        TimedSink::new(handle.clone()),
        &ControllerConfig::default(),
    );

    let first = controller.serve_one()?.expect("first request should be served");
    assert_eq!(first.outcome, CycleOutcome::Faulted);
    assert_eq!(first.samples, 11);
    assert!(first.samples < first.request.expected_samples());
    assert_eq!(handle.position_steps(), 0);
    assert!(!handle.is_enabled());

    handle.clear_far_limit_trip();
    let second = controller.serve_one()?.expect("second request should be served");
    assert_eq!(second.outcome, CycleOutcome::Completed);
    assert_eq!(second.request.range_mm(), 10);
    assert_eq!(second.samples, 21);

    let lines = controller.sink().decoded();
    assert_eq!(lines.len(), 11 + 1 + 21 + 1);
    assert_eq!(lines[11], DeviceLine::End(SentinelStatus::Untagged));
    assert_eq!(positions(&lines[12..]), (0..=100).step_by(5).collect::<Vec<u32>>());
    Ok(())
}

#[test]
fn driver_is_released_after_every_cycle() -> Result<()> {
    let (sim, handle) = rig();
    let mut controller = ScanController::new(
        sim,
        ScriptedLines::new(["B1,ann,10,1", "B2,ann,10,1"]),
        Vec::new(),
        &ControllerConfig::default(),
    );

    for _ in 0..2 {
        controller.serve_one()?.expect("request should be served");
        assert!(!handle.is_enabled());
        assert!(!controller.is_actuator_enabled());
    }
    // enabled once and released once per cycle
    assert_eq!(handle.enable_changes(), 4);
    Ok(())
}

#[test]
fn malformed_requests_are_skipped() -> Result<()> {
    let (sim, handle) = rig();
    let lines = ScriptedLines::default()
        .then("garbage")
        .then("B1,ann,10")
        .then("B1,ann,999,1")
        .idle(3)
        .then("B1,ann,10,1");
    let mut controller = ScanController::new(sim, lines, Vec::new(), &ControllerConfig::default());

    let report = controller.serve_one()?.expect("valid request should be served");
    assert_eq!(report.request.batch_id(), "B1");
    assert_eq!(report.samples, 21);
    assert_eq!(handle.pulses_while_disabled(), 0);
    Ok(())
}

#[test]
fn tagged_sentinel_marks_clean_completion() -> Result<()> {
    let (sim, _handle) = rig();
    let config = ControllerConfig {
        tagged_sentinel: true,
        ..ControllerConfig::default()
    };
    let mut controller =
        ScanController::new(sim, ScriptedLines::new(["B1,ann,10,1"]), Vec::new(), &config);
    controller.run()?;

    let wire = String::from_utf8(controller.sink().clone())?;
    assert_eq!(wire.lines().last(), Some("end;ok"));
    Ok(())
}

#[test]
fn requests_read_from_a_byte_stream() -> Result<()> {
    let (sim, handle) = rig();
    let source = ReaderLineSource::spawn(Cursor::new(b"B1,ann,10,1\r\n".to_vec()))?;
    let mut controller = ScanController::new(sim, source, Vec::new(), &ControllerConfig::default());
    controller.run()?;

    let wire = String::from_utf8(controller.sink().clone())?;
    assert_eq!(wire.lines().count(), 22);
    assert!(!handle.is_enabled());
    Ok(())
}
