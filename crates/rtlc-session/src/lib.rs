//! Host-side acquisition for the RTLC scanner.
//!
//! An [`AcquisitionSession`] sends one request line and decodes the controller's
//! `positionTenthMm;count` stream until the `end` sentinel. Samples reach a
//! [`SampleRenderer`] as they arrive; the finished [`ScanRecord`] is handed to a
//! [`CsvPersister`].
//!
//! ```rust,no_run
//! use rtlc_core::{RequestLimits, ScanRequest};
//! use rtlc_core::config::LinkConfig;
//! use rtlc_session::{AcquisitionSession, CsvPersister, LogRenderer};
//!
//! # async fn example() -> rtlc_core::ScanResult<()> {
//! let request = ScanRequest::new("240125RF", "ann", 20, 2, &RequestLimits::default())?;
//! let session = AcquisitionSession::connect("/dev/ttyACM0", &LinkConfig::default()).await?;
//! let record = session.acquire(request, &mut LogRenderer::new()).await?;
//! CsvPersister::new(".").persist(&record)?;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod persist;
pub mod record;
pub mod render;
pub mod session;

pub use decoder::StreamDecoder;
pub use persist::{verify_integrity, CsvPersister};
pub use record::{Completion, ScanRecord};
pub use render::{LogRenderer, SampleRenderer, SeriesRenderer};
pub use rtlc_core::serial::{available_ports, PortInfo};
pub use session::{AcquisitionEvent, AcquisitionSession};
