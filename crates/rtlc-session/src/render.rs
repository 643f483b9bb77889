//! Sample renderers.
//!
//! A renderer receives each sample as it is decoded, in emission order, with the
//! position already converted to millimetres.

use rtlc_core::{Sample, ScanRequest};
use tracing::info;

use crate::record::ScanRecord;

/// Consumer of live samples.
pub trait SampleRenderer {
    /// Called once before the first sample.
    fn begin(&mut self, _request: &ScanRequest) {}

    /// Called for every decoded sample.
    fn render(&mut self, sample: &Sample);

    /// Called once after the sentinel.
    fn finish(&mut self, _record: &ScanRecord) {}
}

/// Logs every sample with a running total.
#[derive(Debug, Default)]
pub struct LogRenderer {
    expected: usize,
    received: usize,
    total: u64,
}

impl LogRenderer {
    /// Create a renderer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleRenderer for LogRenderer {
    fn begin(&mut self, request: &ScanRequest) {
        self.expected = request.expected_samples();
        self.received = 0;
        self.total = 0;
        info!(
            batch = request.batch_id(),
            positions = self.expected,
            dwell_s = request.dwell().as_secs_f64(),
            "Acquisition started"
        );
    }

    fn render(&mut self, sample: &Sample) {
        self.received += 1;
        self.total += u64::from(sample.count);
        info!(
            "[{:>3}/{}] {:>6.1} mm  {:>6} counts  (total {})",
            self.received,
            self.expected,
            sample.position_mm(),
            sample.count,
            self.total
        );
    }

    fn finish(&mut self, record: &ScanRecord) {
        info!(
            samples = record.samples.len(),
            total_counts = record.total_counts(),
            discarded = record.discarded_lines,
            completion = ?record.completion(),
            "Acquisition finished"
        );
    }
}

/// Accumulates the (position, count) series for plotting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRenderer {
    points: Vec<(f64, u32)>,
    x_max: f64,
    finished: bool,
}

impl SeriesRenderer {
    /// Create an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Points received so far as (millimetres, counts).
    pub fn points(&self) -> &[(f64, u32)] {
        &self.points
    }

    /// Horizontal axis range: `0..=rangeMm`.
    pub fn x_range(&self) -> (f64, f64) {
        (0.0, self.x_max)
    }

    /// Largest count so far, for scaling the vertical axis.
    pub fn y_max(&self) -> u32 {
        self.points.iter().map(|&(_, c)| c).max().unwrap_or(0)
    }

    /// Whether the sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl SampleRenderer for SeriesRenderer {
    fn begin(&mut self, request: &ScanRequest) {
        self.points.clear();
        self.x_max = f64::from(request.range_mm());
        self.finished = false;
    }

    fn render(&mut self, sample: &Sample) {
        self.points.push((sample.position_mm(), sample.count));
    }

    fn finish(&mut self, _record: &ScanRecord) {
        self.finished = true;
    }
}
