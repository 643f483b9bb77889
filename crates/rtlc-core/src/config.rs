//! Configuration system using Figment
//!
//! Configuration is loaded from:
//! 1. `config/rtlc.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `RTLC_`, nested keys separated by `__`
//!
//! Every field has a default matching the reference deployment, so an empty
//! configuration is valid.
//!
//! # Example
//! ```no_run
//! use rtlc_core::config::RtlcConfig;
//!
//! let config = RtlcConfig::load()?;
//! println!("Link: {} baud", config.link.baud_rate);
//! # Ok::<(), rtlc_core::ScanError>(())
//! ```
//!
//! Override from the environment: `RTLC_LINK__BAUD_RATE=115200`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::request::RequestLimits;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rtlc.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtlcConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Transport link parameters
    #[serde(default)]
    pub link: LinkConfig,
    /// Accepted scan range window
    #[serde(default)]
    pub limits: RequestLimits,
    /// Output file settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Scan controller settings
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Fixed parameters of the host ↔ controller link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial bit rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on a single read, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Cadence of the session's non-blocking read check, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl LinkConfig {
    /// Read timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Polling cadence as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Output file settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the scan files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Logic level that means "asserted" on a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// High level asserts the line.
    ActiveHigh,
    /// Low level asserts the line.
    ActiveLow,
}

impl Polarity {
    /// Whether a raw level (`true` = high) means asserted.
    pub fn is_asserted(self, high: bool) -> bool {
        match self {
            Polarity::ActiveHigh => high,
            Polarity::ActiveLow => !high,
        }
    }

    /// Raw level (`true` = high) that produces the requested logical state.
    pub fn level_for(self, asserted: bool) -> bool {
        self.is_asserted(asserted)
    }
}

/// Polarity of each hardware line.
///
/// Defaults follow the reference rig: the driver's enable input is active-low, the
/// direction line is high when moving away from home, and the limit switches are
/// normally-closed to ground with pull-ups, so the line reads high once the switch
/// opens at the end of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePolarity {
    /// Stepper driver enable
    #[serde(default = "active_low")]
    pub enable: Polarity,
    /// Stepper pulse
    #[serde(default = "active_high")]
    pub pulse: Polarity,
    /// Direction; asserted means "away from home"
    #[serde(default = "active_high")]
    pub direction: Polarity,
    /// Photomultiplier pulse detector
    #[serde(default = "active_high")]
    pub sensor: Polarity,
    /// Home-side limit switch
    #[serde(default = "active_high")]
    pub home_limit: Polarity,
    /// Far-side limit switch
    #[serde(default = "active_high")]
    pub far_limit: Polarity,
}

impl Default for LinePolarity {
    fn default() -> Self {
        Self {
            enable: Polarity::ActiveLow,
            pulse: Polarity::ActiveHigh,
            direction: Polarity::ActiveHigh,
            sensor: Polarity::ActiveHigh,
            home_limit: Polarity::ActiveHigh,
            far_limit: Polarity::ActiveHigh,
        }
    }
}

/// Scan controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Stepper pulses per millimetre of carriage travel (must be even)
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: u32,
    /// Delay between pulse edges, in microseconds
    #[serde(default = "default_step_delay")]
    pub step_delay_us: u64,
    /// Travel after which homing gives up, in millimetres
    #[serde(default = "default_max_homing_travel")]
    pub max_homing_travel_mm: u32,
    /// Interval between checks for a request line, in milliseconds
    #[serde(default = "default_request_poll")]
    pub request_poll_ms: u64,
    /// Emit `end;ok` / `end;fault` instead of the bare `end`
    #[serde(default)]
    pub tagged_sentinel: bool,
    /// Line polarities
    #[serde(default)]
    pub lines: LinePolarity,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            step_delay_us: default_step_delay(),
            max_homing_travel_mm: default_max_homing_travel(),
            request_poll_ms: default_request_poll(),
            tagged_sentinel: false,
            lines: LinePolarity::default(),
        }
    }
}

impl ControllerConfig {
    /// Delay between pulse edges.
    pub fn step_delay(&self) -> Duration {
        Duration::from_micros(self.step_delay_us)
    }

    /// Interval between request checks.
    pub fn request_poll(&self) -> Duration {
        Duration::from_millis(self.request_poll_ms)
    }

    /// Pulses for one half-millimetre step.
    pub fn pulses_per_half_mm(&self) -> u32 {
        self.steps_per_mm / 2
    }
}

// Default value functions
fn default_name() -> String {
    "RTLC Scan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_steps_per_mm() -> u32 {
    200
}

fn default_step_delay() -> u64 {
    1000
}

fn default_max_homing_travel() -> u32 {
    200
}

fn default_request_poll() -> u64 {
    100
}

fn active_low() -> Polarity {
    Polarity::ActiveLow
}

fn active_high() -> Polarity {
    Polarity::ActiveHigh
}

impl RtlcConfig {
    /// Load configuration from `config/rtlc.toml` and environment variables
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(RtlcConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("RTLC_").split("__")),
        )
    }

    /// Extract and validate configuration from an assembled figment.
    pub fn from_figment(figment: Figment) -> ScanResult<Self> {
        let config: RtlcConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.link.baud_rate == 0 {
            return Err(ScanError::Configuration(
                "link.baud_rate must be greater than 0".into(),
            ));
        }

        if self.link.poll_interval_ms == 0 {
            return Err(ScanError::Configuration(
                "link.poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.limits.min_range_mm > self.limits.max_range_mm {
            return Err(ScanError::Configuration(format!(
                "limits.min_range_mm ({}) exceeds limits.max_range_mm ({})",
                self.limits.min_range_mm, self.limits.max_range_mm
            )));
        }

        let steps = self.controller.steps_per_mm;
        if steps == 0 || steps % 2 != 0 {
            return Err(ScanError::Configuration(format!(
                "controller.steps_per_mm must be a positive even number, got {steps}"
            )));
        }

        if self.controller.max_homing_travel_mm < self.limits.max_range_mm {
            return Err(ScanError::Configuration(format!(
                "controller.max_homing_travel_mm ({}) is shorter than the largest range ({})",
                self.controller.max_homing_travel_mm, self.limits.max_range_mm
            )));
        }

        Ok(())
    }
}
