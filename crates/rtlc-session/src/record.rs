//! The result of one acquisition.

use rtlc_core::{Sample, ScanRequest, SentinelStatus};

/// Classification of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every position was measured.
    Clean,
    /// The controller reported a far-limit fault.
    Fault,
    /// Fewer samples than planned arrived before the sentinel.
    Truncated,
}

/// Everything the host collected for one request, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    /// The request that was sent.
    pub request: ScanRequest,
    /// Decoded samples in the order they arrived.
    pub samples: Vec<Sample>,
    /// The sentinel that ended the stream.
    pub sentinel: SentinelStatus,
    /// Received lines that were neither a sample nor a sentinel.
    pub discarded_lines: u64,
}

impl ScanRecord {
    /// How the scan ended.
    ///
    /// An explicit `end;fault` is a fault. Otherwise the scan is clean only if
    /// every planned position arrived and the last one is the end of the range.
    /// Anything short of that is truncated, which is how a far-limit fault shows up
    /// behind a bare `end`.
    pub fn completion(&self) -> Completion {
        if self.sentinel == SentinelStatus::Fault {
            return Completion::Fault;
        }
        let reached_end = self
            .samples
            .last()
            .is_some_and(|s| s.position_tenth_mm == self.request.final_position_tenth_mm());
        if self.samples.len() == self.request.expected_samples() && reached_end {
            Completion::Clean
        } else {
            Completion::Truncated
        }
    }

    /// Sum of all counts.
    pub fn total_counts(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.count)).sum()
    }
}
