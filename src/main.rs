//! CLI entry point for the RTLC scanner.
//!
//! ```bash
//! rtlc ports
//! rtlc scan --port /dev/ttyACM0 --operator ann --range 20 --duration 2
//! rtlc scan --simulate --operator ann --range 20 --duration 2
//! rtlc verify 240125RF.csv
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use rtlc_core::config::{RtlcConfig, DEFAULT_CONFIG_PATH};
use rtlc_core::serial::SerialPortIO;
use rtlc_core::{default_batch_id, logging, ScanRequest};
use rtlc_session::{
    available_ports, verify_integrity, AcquisitionSession, Completion, CsvPersister, LogRenderer,
    ScanRecord,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rtlc")]
#[command(about = "Linear-scan radiation detector acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports the scanner may be attached to
    Ports,

    /// Run one scan and write the result file
    Scan(ScanArgs),

    /// Check the SHA-256 footer of a scan file
    Verify {
        /// Scan file to check
        file: PathBuf,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Serial port of the controller
    #[arg(long, required_unless_present = "simulate")]
    port: Option<String>,

    /// Operator name (letters only)
    #[arg(long)]
    operator: String,

    /// Scanned range in millimetres
    #[arg(long)]
    range: u32,

    /// Total acquisition time in minutes
    #[arg(long)]
    duration: u32,

    /// Batch identifier [default: today's date as DDMMYYRF]
    #[arg(long)]
    batch: Option<String>,

    /// Directory for the result file [default: storage.output_dir]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Scan against an in-process simulated controller instead of a serial port
    #[arg(long, conflicts_with = "port")]
    simulate: bool,

    /// Run the simulated rig on the wall clock
    #[arg(long, requires = "simulate")]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RtlcConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Scan(args) => run_scan(args, config).await,
        Commands::Verify { file } => verify(file),
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

fn verify(file: PathBuf) -> Result<()> {
    if verify_integrity(&file)? {
        println!("{}: OK", file.display());
        Ok(())
    } else {
        bail!("{}: SHA-256 footer does not match contents", file.display())
    }
}

async fn run_scan(args: ScanArgs, config: RtlcConfig) -> Result<()> {
    let batch = args
        .batch
        .unwrap_or_else(|| default_batch_id(Local::now().date_naive()));
    let request = ScanRequest::new(
        batch,
        args.operator,
        args.range,
        args.duration,
        &config.limits,
    )?;
    info!(
        request = %request,
        positions = request.expected_samples(),
        dwell_s = request.dwell().as_secs_f64(),
        "Starting scan"
    );

    let record = if args.simulate {
        acquire_simulated(&config, request, args.realtime).await?
    } else {
        let port = args.port.context("--port is required")?;
        let session = AcquisitionSession::connect(&port, &config.link).await?;
        acquire(session, request).await?
    };

    let Some(record) = record else {
        return Ok(());
    };

    match record.completion() {
        Completion::Clean => {}
        Completion::Fault => warn!("Scan ended on a far-limit fault; saving partial data"),
        Completion::Truncated => warn!(
            received = record.samples.len(),
            expected = record.request.expected_samples(),
            "Scan ended early; saving partial data"
        ),
    }

    let output_dir = args.output_dir.unwrap_or(config.storage.output_dir);
    let path = CsvPersister::new(output_dir).persist(&record)?;
    println!("Saved {} ({} samples)", path.display(), record.samples.len());
    Ok(())
}

/// Acquire until the sentinel, or stop polling on Ctrl-C.
///
/// An interrupted scan is not persisted; the controller finishes its sweep and
/// homes on its own.
async fn acquire<T: SerialPortIO + 'static>(
    session: AcquisitionSession<T>,
    request: ScanRequest,
) -> Result<Option<ScanRecord>> {
    let mut renderer = LogRenderer::new();
    tokio::select! {
        record = session.acquire(request, &mut renderer) => Ok(Some(record?)),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("Interrupted: host polling stopped, the controller will finish and home");
            Ok(None)
        }
    }
}

#[cfg(unix)]
async fn acquire_simulated(
    config: &RtlcConfig,
    request: ScanRequest,
    realtime: bool,
) -> Result<Option<ScanRecord>> {
    let scanner = rtlc::simulated::spawn(config, rtlc::sim_config(config, realtime))?;
    let session = AcquisitionSession::from_transport(scanner.link, &config.link);
    let record = acquire(session, request).await?;
    // The session dropped the link, so the controller sees its source close.
    if record.is_some() {
        let joined = tokio::task::spawn_blocking(move || scanner.controller.join()).await?;
        match joined {
            Ok(result) => result?,
            Err(_) => bail!("simulated controller thread panicked"),
        }
    }
    Ok(record)
}

#[cfg(not(unix))]
async fn acquire_simulated(
    _config: &RtlcConfig,
    _request: ScanRequest,
    _realtime: bool,
) -> Result<Option<ScanRecord>> {
    bail!("--simulate needs Unix domain sockets")
}
