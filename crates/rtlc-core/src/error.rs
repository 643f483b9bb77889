//! Error types shared across the scan system.
//!
//! `ScanError` is the top-level error for host-side operations. It mirrors the
//! error taxonomy of the acquisition system:
//!
//! - **`Configuration`**: a malformed or out-of-range request or configuration value.
//!   Rejected before any transport I/O takes place.
//! - **`Connection`**: the transport could not be opened. Never retried.
//! - **`Protocol`**: a line could not be decoded. The session normally swallows these
//!   (noise tolerance); the variant exists for callers that decode lines directly.
//! - **`TransportClosed`**: the link reached EOF before the completion sentinel.
//! - **`Storage`** / **`Integrity`**: persisting or verifying a scan file failed.
//!
//! Device-side hardware faults never appear here: the controller reports them only
//! through the protocol, as an early sentinel.

use thiserror::Error;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Reasons a scan request is rejected.
///
/// These are configuration errors: they are raised while building a request from
/// operator input (host) or while parsing a request line (controller).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The batch id is empty or only whitespace.
    #[error("batch id must not be empty")]
    EmptyBatch,

    /// The operator name is empty or contains something other than ASCII letters.
    #[error("operator must be a non-empty string of ASCII letters, got '{0}'")]
    InvalidOperator(String),

    /// A text field holds a character the wire or the result file name cannot carry.
    ///
    /// Commas and line breaks would split the request line; path separators and `..`
    /// would move the result file out of the output directory.
    #[error("field '{field}' must not contain ',', line breaks, '/', '\\' or '..'")]
    ForbiddenCharacter {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The range falls outside the configured limits.
    #[error("range {value} mm is outside [{min}, {max}] mm")]
    RangeOutOfBounds {
        /// Requested range in millimetres.
        value: u32,
        /// Smallest accepted range.
        min: u32,
        /// Largest accepted range.
        max: u32,
    },

    /// The acquisition time is zero.
    #[error("acquisition time must be at least 1 minute, got {0}")]
    DurationTooShort(u32),

    /// A request line did not split into exactly four fields.
    #[error("expected 4 comma-separated fields, got {0}")]
    FieldCount(usize),

    /// A numeric field of a request line did not parse.
    #[error("field '{field}' is not a valid integer: '{value}'")]
    NotAnInteger {
        /// Name of the offending field.
        field: &'static str,
        /// The text as received.
        value: String,
    },
}

/// A line received from the controller that is neither a sample nor a sentinel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Nothing but whitespace between two terminators.
    #[error("empty line")]
    Empty,

    /// Neither `end` nor a `position;count` pair.
    #[error("unrecognised line '{0}'")]
    Unrecognised(String),

    /// A `position;count` pair whose fields are not non-negative integers.
    #[error("invalid integer in line '{0}'")]
    InvalidInteger(String),
}

/// Primary host-side error type.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A configuration file or value failed to load or validate.
    ///
    /// **Recovery Strategy**: Abort startup and report the offending key.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operator input could not form a valid request.
    ///
    /// Raised before the link is opened, so nothing reaches the controller.
    #[error("Invalid scan request: {0}")]
    Request(#[from] RequestError),

    /// A received line could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The serial port could not be opened.
    ///
    /// **Recovery Strategy**: None automatic. The operator picks another port or fixes
    /// the cabling.
    #[error("Could not open serial port '{port}': {message}")]
    Connection {
        /// Port name as given by the operator.
        port: String,
        /// Underlying driver message.
        message: String,
    },

    /// The link reached EOF before the end-of-scan sentinel.
    #[error("Transport closed before the end-of-scan sentinel")]
    TransportClosed,

    /// Reading or writing the link or a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the result file failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A result file has no footer or could not be checked.
    #[error("Integrity check failed: {0}")]
    Integrity(String),
}

impl ScanError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Connection errors are deliberately non-retryable: the operator has to pick
    /// another port or fix the cabling.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Io(_) | ScanError::Storage(_))
    }
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_converts_into_scan_error() {
        let err: ScanError = RequestError::DurationTooShort(0).into();
        assert!(matches!(err, ScanError::Request(RequestError::DurationTooShort(0))));
        assert!(err.to_string().contains("at least 1 minute"));
    }

    #[test]
    fn connection_errors_are_not_retryable() {
        let err = ScanError::Connection {
            port: "/dev/ttyACM0".into(),
            message: "No such file or directory".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("/dev/ttyACM0"));
    }

    #[test]
    fn range_error_reports_bounds() {
        let err = RequestError::RangeOutOfBounds {
            value: 200,
            min: 10,
            max: 150,
        };
        assert_eq!(err.to_string(), "range 200 mm is outside [10, 150] mm");
    }
}
