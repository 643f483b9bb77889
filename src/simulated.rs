//! In-process simulated scanner.
//!
//! Runs a [`ScanController`] on the simulated rig in a background thread, wired
//! to the host through a Unix socket pair, so the whole request-to-file path can
//! be exercised without hardware.

use std::os::unix::net::UnixStream as StdUnixStream;
use std::thread::{self, JoinHandle};

use rtlc_controller::{
    ControllerError, ReaderLineSource, ScanController, SimConfig, SimHandle, SimulatedRig,
};
use rtlc_core::config::RtlcConfig;
use tokio::net::UnixStream;
use tracing::{error, info};

/// Host end of the link plus the controller thread.
pub struct SimulatedScanner {
    /// Link to hand to an acquisition session.
    pub link: UnixStream,
    /// Inspection handle on the simulated rig.
    pub rig: SimHandle,
    /// Controller thread; finishes once the host end is dropped.
    pub controller: JoinHandle<Result<(), ControllerError>>,
}

/// Start a controller thread on `rig` and return the host end of its link.
///
/// Must be called from within a Tokio runtime.
pub fn spawn(config: &RtlcConfig, rig: SimConfig) -> std::io::Result<SimulatedScanner> {
    let (host, device) = StdUnixStream::pair()?;
    host.set_nonblocking(true)?;
    let link = UnixStream::from_std(host)?;

    let requests = ReaderLineSource::spawn(device.try_clone()?)?;
    let sim = SimulatedRig::new(rig);
    let handle = sim.handle();
    let controller_config = config.controller.clone();

    let controller = thread::Builder::new()
        .name("rtlc-sim-controller".into())
        .spawn(move || {
            let mut controller = ScanController::new(sim, requests, device, &controller_config);
            let result = controller.run();
            match &result {
                Ok(()) => info!("Simulated controller stopped"),
                Err(e) => error!(error = %e, "Simulated controller failed"),
            }
            result
        })?;

    Ok(SimulatedScanner {
        link,
        rig: handle,
        controller,
    })
}
