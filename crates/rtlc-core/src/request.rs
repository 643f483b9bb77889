//! Scan request: the single line the host sends to start a scan.
//!
//! A [`ScanRequest`] can only be obtained through validation, either from operator
//! input ([`ScanRequest::new`]) or from a received wire line
//! ([`ScanRequest::parse_wire`]). Both paths enforce the same [`RequestLimits`].

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::protocol::POSITION_STEP_TENTH_MM;

/// Bounds on the scanned range.
///
/// The upper bound is a deployment constant: it must not exceed the physical travel
/// between the two limit switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimits {
    /// Smallest accepted range in millimetres (inclusive).
    #[serde(default = "default_min_range")]
    pub min_range_mm: u32,
    /// Largest accepted range in millimetres (inclusive).
    #[serde(default = "default_max_range")]
    pub max_range_mm: u32,
}

fn default_min_range() -> u32 {
    10
}

fn default_max_range() -> u32 {
    150
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            min_range_mm: default_min_range(),
            max_range_mm: default_max_range(),
        }
    }
}

impl RequestLimits {
    /// Limits for an explicit range window.
    pub fn new(min_range_mm: u32, max_range_mm: u32) -> Self {
        Self {
            min_range_mm,
            max_range_mm,
        }
    }

    fn check_range(&self, range_mm: u32) -> Result<(), RequestError> {
        // A zero range would make the dwell formula divide by zero.
        let min = self.min_range_mm.max(1);
        if range_mm < min || range_mm > self.max_range_mm {
            return Err(RequestError::RangeOutOfBounds {
                value: range_mm,
                min,
                max: self.max_range_mm,
            });
        }
        Ok(())
    }
}

/// Validated scan parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    batch_id: String,
    operator: String,
    range_mm: u32,
    duration_min: u32,
}

impl ScanRequest {
    /// Build a request from operator input, rejecting anything the controller could
    /// not execute or the wire could not carry.
    ///
    /// Surrounding whitespace is trimmed from the text fields, as [`parse_wire`] does,
    /// so both ends agree on the batch id that names the result file.
    ///
    /// [`parse_wire`]: ScanRequest::parse_wire
    pub fn new(
        batch_id: impl Into<String>,
        operator: impl Into<String>,
        range_mm: u32,
        duration_min: u32,
        limits: &RequestLimits,
    ) -> Result<Self, RequestError> {
        let batch_id = batch_id.into().trim().to_string();
        let operator = operator.into().trim().to_string();

        if batch_id.is_empty() {
            return Err(RequestError::EmptyBatch);
        }
        if has_forbidden_chars(&batch_id) || is_dot_component(&batch_id) {
            return Err(RequestError::ForbiddenCharacter { field: "batch_id" });
        }
        if operator.is_empty() || !operator.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RequestError::InvalidOperator(operator));
        }
        limits.check_range(range_mm)?;
        if duration_min < 1 {
            return Err(RequestError::DurationTooShort(duration_min));
        }

        Ok(Self {
            batch_id,
            operator,
            range_mm,
            duration_min,
        })
    }

    /// Parse a `batchId,operator,rangeMm,durationMin` line.
    ///
    /// Surrounding whitespace (including the line terminator) is ignored, both around
    /// the line and around each field.
    pub fn parse_wire(line: &str, limits: &RequestLimits) -> Result<Self, RequestError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(RequestError::FieldCount(fields.len()));
        }

        let range_mm = parse_field("range_mm", fields[2])?;
        let duration_min = parse_field("duration_min", fields[3])?;
        Self::new(fields[0], fields[1], range_mm, duration_min, limits)
    }

    /// The request as a wire line, without the terminator.
    pub fn to_wire(&self) -> String {
        format!(
            "{},{},{},{}",
            self.batch_id, self.operator, self.range_mm, self.duration_min
        )
    }

    /// Identifier of the run.
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Operator name.
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Scanned range in millimetres.
    pub fn range_mm(&self) -> u32 {
        self.range_mm
    }

    /// Total acquisition time in minutes.
    pub fn duration_min(&self) -> u32 {
        self.duration_min
    }

    /// Dwell window per position: `durationMin * 60 / (2 * rangeMm)` seconds.
    ///
    /// Two samples per millimetre, so the per-position dwell shrinks as the range
    /// grows and the whole scan takes `durationMin` minutes of counting.
    pub fn dwell(&self) -> Duration {
        let seconds = f64::from(self.duration_min) * 60.0 / (2.0 * f64::from(self.range_mm));
        Duration::from_secs_f64(seconds)
    }

    /// Number of samples a complete scan produces (`2R + 1`).
    pub fn expected_samples(&self) -> usize {
        2 * self.range_mm as usize + 1
    }

    /// Position of the last sample, in tenths of a millimetre (`10R`).
    pub fn final_position_tenth_mm(&self) -> u32 {
        self.range_mm * 10
    }

    /// All sample positions of the scan, in tenths of a millimetre, in emission order.
    pub fn positions(&self) -> impl Iterator<Item = u32> {
        (0..=2 * self.range_mm).map(|i| i * POSITION_STEP_TENTH_MM)
    }
}

impl fmt::Display for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Default batch identifier for a given day: `DDMMYYRF`.
pub fn default_batch_id(date: NaiveDate) -> String {
    format!("{}RF", date.format("%d%m%y"))
}

// The batch id is also the result file stem.
fn has_forbidden_chars(value: &str) -> bool {
    value.contains([',', '\n', '\r', '/', '\\', '\0'])
}

fn is_dot_component(value: &str) -> bool {
    value == "." || value == ".."
}

fn parse_field(field: &'static str, value: &str) -> Result<u32, RequestError> {
    value.parse().map_err(|_| RequestError::NotAnInteger {
        field,
        value: value.to_string(),
    })
}
