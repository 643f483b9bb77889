//! CSV persistence with an integrity footer.
//!
//! File layout (`;`-delimited, decimal comma in positions):
//!
//! ```text
//! Position (mm);Counts
//! 0,0;12
//! 0,5;9
//! ...
//! Batch:;240125RF
//! Operator:;ann
//! Range:;20 mm
//! Acquisition time:;2 min
//! Date:;24/01/2025, 14:03:22
//! SHA256:;<hex digest of every byte above>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use rtlc_core::config::StorageConfig;
use rtlc_core::{ScanError, ScanResult};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::record::ScanRecord;

/// Prefix of the last line of every persisted file.
pub const FOOTER_PREFIX: &str = "SHA256:;";

/// Writes finished scans to `<output_dir>/<batchId>.csv`.
#[derive(Debug, Clone)]
pub struct CsvPersister {
    output_dir: PathBuf,
}

impl CsvPersister {
    /// Persist into `output_dir`, creating it on first write.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Persist into the configured output directory.
    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(&storage.output_dir)
    }

    /// Where a record for `batch_id` will be written.
    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.output_dir.join(format!("{batch_id}.csv"))
    }

    /// Write `record`, stamped with the current local time.
    pub fn persist(&self, record: &ScanRecord) -> ScanResult<PathBuf> {
        self.persist_at(record, Local::now().naive_local())
    }

    /// Write `record` stamped with `timestamp`. Overwrites an existing file for the
    /// same batch.
    pub fn persist_at(&self, record: &ScanRecord, timestamp: NaiveDateTime) -> ScanResult<PathBuf> {
        let contents = render(record, timestamp)?;

        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir).map_err(|e| {
                ScanError::Storage(format!(
                    "Failed to create output directory '{}': {e}",
                    self.output_dir.display()
                ))
            })?;
        }
        let path = self.path_for(record.request.batch_id());
        fs::write(&path, contents).map_err(|e| {
            ScanError::Storage(format!("Failed to write '{}': {e}", path.display()))
        })?;

        info!(
            path = %path.display(),
            samples = record.samples.len(),
            "Scan persisted"
        );
        Ok(path)
    }
}

/// File contents for `record`, footer included.
pub fn render(record: &ScanRecord, timestamp: NaiveDateTime) -> ScanResult<Vec<u8>> {
    let mut body = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut body);

        writer
            .write_record(["Position (mm)", "Counts"])
            .map_err(storage_error)?;
        for sample in &record.samples {
            writer
                .write_record([
                    format!("{:.1}", sample.position_mm()).replace('.', ","),
                    sample.count.to_string(),
                ])
                .map_err(storage_error)?;
        }

        let request = &record.request;
        let metadata = [
            ("Batch:", request.batch_id().to_string()),
            ("Operator:", request.operator().to_string()),
            ("Range:", format!("{} mm", request.range_mm())),
            ("Acquisition time:", format!("{} min", request.duration_min())),
            ("Date:", timestamp.format("%d/%m/%Y, %H:%M:%S").to_string()),
        ];
        for (key, value) in metadata {
            writer
                .write_record([key, value.as_str()])
                .map_err(storage_error)?;
        }
        writer.flush()?;
    }

    let digest = digest_hex(&body);
    body.extend_from_slice(FOOTER_PREFIX.as_bytes());
    body.extend_from_slice(digest.as_bytes());
    Ok(body)
}

/// Recompute the digest of a persisted file and compare it with its footer.
///
/// Returns `Ok(false)` when the contents were altered after writing. A file with no
/// footer is an [`ScanError::Integrity`] error.
pub fn verify_integrity(path: impl AsRef<Path>) -> ScanResult<bool> {
    let path = path.as_ref();
    let contents = fs::read(path)?;
    verify_bytes(&contents).map_err(|message| {
        ScanError::Integrity(format!("{}: {message}", path.display()))
    })
}

fn verify_bytes(contents: &[u8]) -> Result<bool, String> {
    let footer_start = find_footer(contents).ok_or("no SHA256 footer")?;
    let (body, footer) = contents.split_at(footer_start);
    let recorded = std::str::from_utf8(&footer[FOOTER_PREFIX.len()..])
        .map_err(|_| "footer is not valid UTF-8")?
        .trim();
    Ok(recorded.eq_ignore_ascii_case(&digest_hex(body)))
}

/// Byte offset of the footer line, which must be the last line of the file.
fn find_footer(contents: &[u8]) -> Option<usize> {
    let prefix = FOOTER_PREFIX.as_bytes();
    let trimmed_len = contents
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let last_line_start = contents[..trimmed_len]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    contents[last_line_start..]
        .starts_with(prefix)
        .then_some(last_line_start)
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn storage_error(err: csv::Error) -> ScanError {
    ScanError::Storage(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rtlc_core::{RequestLimits, Sample, ScanRequest, SentinelStatus};

    fn record() -> ScanRecord {
        ScanRecord {
            request: ScanRequest::new("240125RF", "ann", 10, 2, &RequestLimits::default())
                .unwrap(),
            samples: vec![Sample::new(0, 12), Sample::new(5, 9), Sample::new(10, 0)],
            sentinel: SentinelStatus::Untagged,
            discarded_lines: 0,
        }
    }

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 24)
            .unwrap()
            .and_hms_opt(14, 3, 22)
            .unwrap()
    }

    #[test]
    fn layout_matches_lab_format() {
        let bytes = render(&record(), timestamp()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            &lines[..9],
            &[
                "Position (mm);Counts",
                "0,0;12",
                "0,5;9",
                "1,0;0",
                "Batch:;240125RF",
                "Operator:;ann",
                "Range:;10 mm",
                "Acquisition time:;2 min",
                "Date:;24/01/2025, 14:03:22",
            ]
        );
        assert!(lines[9].starts_with(FOOTER_PREFIX));
        assert_eq!(lines[9].len(), FOOTER_PREFIX.len() + 64);
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn footer_covers_every_prior_byte() {
        let bytes = render(&record(), timestamp()).unwrap();
        assert_eq!(verify_bytes(&bytes), Ok(true));

        let mut tampered = bytes.clone();
        tampered[22] = b'7';
        assert_eq!(verify_bytes(&tampered), Ok(false));
    }

    #[test]
    fn missing_footer_is_reported() {
        assert!(verify_bytes(b"Position (mm);Counts\n0,0;1\n").is_err());
    }
}
