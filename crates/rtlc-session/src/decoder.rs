//! Incremental decoding of the controller's output stream.

use rtlc_core::{DeviceLine, LineFramer, ProtocolError};
use tracing::debug;

/// Turns received bytes into samples and sentinels.
///
/// Lines that decode as neither are dropped, as the link tolerates noise, but every
/// drop is counted and logged at `debug`. Blank lines are skipped without counting.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    framer: LineFramer,
    discarded: u64,
}

impl StreamDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.framer.push(bytes);
    }

    /// The next decoded line, if a complete one is buffered.
    pub fn next_line(&mut self) -> Option<DeviceLine> {
        while let Some(raw) = self.framer.next_line() {
            match DeviceLine::decode(&raw) {
                Ok(line) => return Some(line),
                Err(ProtocolError::Empty) => {}
                Err(err) => {
                    self.discarded += 1;
                    debug!(error = %err, discarded = self.discarded, "Discarding line");
                }
            }
        }
        None
    }

    /// Lines dropped so far, including partial lines cut for exceeding the length cap.
    pub fn discarded(&self) -> u64 {
        self.discarded + self.framer.overflows()
    }

    /// Bytes of an incomplete line still buffered.
    pub fn pending(&self) -> usize {
        self.framer.pending()
    }
}
