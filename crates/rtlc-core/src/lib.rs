//! # RTLC Core
//!
//! Types shared by the scan controller and the acquisition session.
//!
//! - **`request`**: the validated [`ScanRequest`] and the derived timing model
//!   (dwell per position, expected sample count).
//! - **`protocol`**: the line-oriented wire format: [`Sample`], the end-of-stream
//!   sentinel and the [`LineFramer`] both ends use to buffer partial lines.
//! - **`config`**: Figment-based configuration (TOML + `RTLC_` environment).
//! - **`logging`**: tracing subscriber initialisation.
//! - **`serial`**: host-side serial link helpers and port discovery.
//! - **`error`**: the error taxonomy.

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod request;
pub mod serial;

pub use error::{ProtocolError, RequestError, ScanError, ScanResult};
pub use protocol::{DeviceLine, LineFramer, Sample, SentinelStatus, SENTINEL};
pub use request::{default_batch_id, RequestLimits, ScanRequest};
