//! Scan controller over stdio.
//!
//! Reads request lines from stdin and writes the sample stream to stdout, driving
//! the simulated rig. Logs go to stderr so stdout carries only the wire protocol.
//! Exits when stdin closes.
//!
//! ```bash
//! echo "240125RF,ann,20,2" | rtlc-controller
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rtlc::sim_config;
use rtlc_controller::{ReaderLineSource, ScanController, SimulatedRig};
use rtlc_core::config::{RtlcConfig, DEFAULT_CONFIG_PATH};
use rtlc_core::logging::{self, LogSink, TracingConfig};

#[derive(Parser)]
#[command(name = "rtlc-controller")]
#[command(about = "RTLC scan controller on a simulated rig, speaking the wire protocol on stdio", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run the rig on the wall clock instead of simulated time
    #[arg(long)]
    realtime: bool,

    /// Power-up carriage position in millimetres
    #[arg(long)]
    start_mm: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RtlcConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_sink(LogSink::Stderr)
        .with_ansi(false);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    let mut rig = sim_config(&config, cli.realtime);
    if let Some(start_mm) = cli.start_mm {
        rig.start_position_mm = start_mm;
    }

    let requests = ReaderLineSource::spawn(std::io::stdin())?;
    let mut controller = ScanController::new(
        SimulatedRig::new(rig),
        requests,
        std::io::stdout(),
        &config.controller,
    );
    controller.run()?;
    Ok(())
}
